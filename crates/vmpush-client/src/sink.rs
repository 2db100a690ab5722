//! The buffering metrics sink
//!
//! [`MetricsSink`] collects measurements in submission order and ships them
//! in batches. A batch leaves the buffer only when the store has accepted it;
//! a failed flush keeps everything so the next flush retries it. Appending
//! and the threshold flush it may trigger happen under one lock, so each
//! threshold crossing flushes at most once even with several producers.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use vmpush_core::{Result, SinkConfig};

use crate::encoder::encode;
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, Payload, Transport};
use crate::Measurement;

/// Bytes of each payload echoed at debug level
const PAYLOAD_SAMPLE_BYTES: usize = 500;

/// Cheaply cloneable handle to a metrics buffer and its transport
///
/// Clones share the same buffer and connection pool.
#[derive(Clone)]
pub struct MetricsSink {
    inner: Arc<Inner>,
}

struct Inner {
    config: SinkConfig,
    retry: RetryPolicy,
    transport: Box<dyn Transport>,
    buffer: Mutex<Vec<Measurement>>,
}

impl MetricsSink {
    /// Create a sink that ships over HTTP to `config.endpoint_url`
    ///
    /// Fails immediately on misconfiguration.
    pub fn new(config: SinkConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        info!("Initializing metrics sink for {}", transport.url());
        Self::with_transport(config, transport)
    }

    /// Create a sink over a custom transport
    pub fn with_transport(config: SinkConfig, transport: impl Transport + 'static) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                retry: RetryPolicy::from_config(&config),
                config,
                transport: Box::new(transport),
                buffer: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn job_name(&self) -> &str {
        &self.inner.config.job_name
    }

    pub fn config(&self) -> &SinkConfig {
        &self.inner.config
    }

    /// Submit a measurement stamped with the current time
    pub async fn submit(&self, name: &str, value: f64, labels: &[(&str, &str)]) -> Result<()> {
        let measurement = Measurement::new(name, value)?.with_labels(labels.iter().copied())?;
        self.submit_measurement(measurement).await
    }

    /// Submit an unlabeled measurement stamped with the current time
    pub async fn record(&self, name: &str, value: f64) -> Result<()> {
        self.submit(name, value, &[]).await
    }

    /// Submit a measurement with an explicit epoch-millis timestamp
    pub async fn submit_at(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
        timestamp_ms: i64,
    ) -> Result<()> {
        let measurement = Measurement::new(name, value)?
            .with_labels(labels.iter().copied())?
            .at(timestamp_ms);
        self.submit_measurement(measurement).await
    }

    /// Append a measurement, flushing when the batch is full
    ///
    /// Invalid measurements are rejected. The `job_name` label is always set
    /// to this sink's job, and a missing timestamp becomes "now". When the
    /// buffer reaches `batch_size` the flush runs before this returns; its
    /// outcome is logged, not returned.
    pub async fn submit_measurement(&self, measurement: Measurement) -> Result<()> {
        measurement.validate()?;
        let measurement = measurement.stamped().with_identity(self.job_name());
        debug!(
            "Added metric: {} = {}, labels: {:?}",
            measurement.name(),
            measurement.value(),
            measurement.labels()
        );

        let mut buffer = self.inner.buffer.lock().await;
        buffer.push(measurement);

        if buffer.len() >= self.inner.config.batch_size {
            debug!(
                "Buffer reached batch size {}, flushing",
                self.inner.config.batch_size
            );
            self.flush_locked(&mut buffer).await;
        }
        Ok(())
    }

    /// Send everything buffered
    ///
    /// Returns `true` when the buffer was empty or the store accepted the
    /// whole batch (which then leaves the buffer). Returns `false` when every
    /// attempt failed; the buffer is left exactly as it was.
    pub async fn flush(&self) -> bool {
        let mut buffer = self.inner.buffer.lock().await;
        self.flush_locked(&mut buffer).await
    }

    async fn flush_locked(&self, buffer: &mut Vec<Measurement>) -> bool {
        if buffer.is_empty() {
            debug!("No metrics to flush");
            return true;
        }

        let count = buffer.len();
        let text = encode(buffer);
        info!("Flushing {} metrics", count);
        debug!("Payload sample: {}", sample(&text, PAYLOAD_SAMPLE_BYTES));

        let payload = Payload::prepare(&text, self.inner.config.enable_compression, count);
        let delivered = self
            .inner
            .retry
            .deliver(self.inner.transport.as_ref(), &payload)
            .await;

        if delivered {
            info!("Successfully sent {} metrics", count);
            buffer.clear();
        } else {
            error!(
                "Failed to send {} metrics; keeping them for the next flush",
                count
            );
        }
        delivered
    }

    /// Final flush for the end of the sink's usage
    ///
    /// Always attempts one flush; returns its outcome.
    pub async fn close(&self) -> bool {
        if !self.is_empty().await {
            info!("Flushing remaining metrics on close");
        }
        self.flush().await
    }

    /// Run `f` with a handle to this sink, then close the sink
    ///
    /// The closing flush runs whatever `f` produced, including an `Err`, and
    /// the output of `f` is handed back together with whether that flush
    /// succeeded.
    ///
    /// ```no_run
    /// use vmpush_client::MetricsSink;
    /// use vmpush_core::{Result, SinkConfig};
    ///
    /// async fn run_job() -> Result<()> {
    ///     let sink = MetricsSink::new(SinkConfig::new("http://localhost:8428", "report"))?;
    ///     let (outcome, flushed) = sink
    ///         .scope(|sink| async move {
    ///             sink.submit("rows_total", 42.0, &[("dataset", "sessions")]).await?;
    ///             Ok::<_, vmpush_core::VmError>(())
    ///         })
    ///         .await;
    ///     if !flushed {
    ///         tracing::warn!("final metrics flush failed");
    ///     }
    ///     outcome
    /// }
    /// ```
    pub async fn scope<F, Fut, R>(&self, f: F) -> (R, bool)
    where
        F: FnOnce(MetricsSink) -> Fut,
        Fut: Future<Output = R>,
    {
        let output = f(self.clone()).await;
        let flushed = self.close().await;
        (output, flushed)
    }

    /// Number of buffered measurements
    pub async fn len(&self) -> usize {
        self.inner.buffer.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.buffer.lock().await.is_empty()
    }

    /// Copy of the buffered measurements, in submission order
    pub async fn snapshot(&self) -> Vec<Measurement> {
        self.inner.buffer.lock().await.clone()
    }
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink")
            .field("config", &self.inner.config)
            .field("retry", &self.inner.retry)
            .finish_non_exhaustive()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let pending = self.buffer.get_mut().len();
        if pending > 0 {
            warn!(
                "Metrics sink for job {} dropped with {} unflushed metrics",
                self.config.job_name, pending
            );
        }
    }
}

/// Prefix of `text`, at most `max` bytes, cut on a char boundary
fn sample(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::DeliveryError;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use vmpush_core::VmError;

    /// Fails the first `failures` sends, then succeeds; keeps every body it saw
    #[derive(Default)]
    struct ScriptedTransport {
        failures: usize,
        bodies: StdMutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn failing(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                bodies: StdMutex::default(),
            })
        }

        fn calls(&self) -> usize {
            self.bodies.lock().unwrap().len()
        }

        fn bodies(&self) -> Vec<String> {
            self.bodies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, payload: &Payload) -> std::result::Result<(), DeliveryError> {
            let mut bodies = self.bodies.lock().unwrap();
            bodies.push(String::from_utf8(payload.body().to_vec()).unwrap());
            if bodies.len() <= self.failures {
                Err(DeliveryError::BadStatus {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn config() -> SinkConfig {
        SinkConfig::new("http://localhost:8428", "job1")
            .with_compression(false)
            .with_backoff_unit(Duration::from_millis(10))
    }

    fn sink(config: SinkConfig, transport: &Arc<ScriptedTransport>) -> MetricsSink {
        MetricsSink::with_transport(config, Arc::clone(transport)).unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_line() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        sink.submit_at("rows_total", 42.0, &[("dataset", "x")], 1_700_000_000_000)
            .await
            .unwrap();
        assert!(sink.flush().await);

        assert_eq!(
            transport.bodies(),
            vec!["rows_total{dataset=\"x\",job_name=\"job1\"} 42 1700000000000\n".to_string()]
        );
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_job_name_always_wins() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        sink.submit("rows_total", 1.0, &[("job_name", "other")])
            .await
            .unwrap();
        let buffered = sink.snapshot().await;
        assert_eq!(buffered[0].label("job_name"), Some("job1"));
    }

    #[tokio::test]
    async fn test_record_carries_only_the_job_label() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        sink.record("rows_total", 5.0).await.unwrap();
        let buffered = sink.snapshot().await;
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].value(), 5.0);
        assert_eq!(buffered[0].labels().len(), 1);
        assert_eq!(buffered[0].label("job_name"), Some("job1"));
        assert!(buffered[0].timestamp().is_some());

        assert!(sink.record("rows total", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_timestamp_set_at_submission() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        let before = chrono::Utc::now().timestamp_millis();
        sink.submit("rows_total", 1.0, &[]).await.unwrap();
        let after = chrono::Utc::now().timestamp_millis();

        let ts = sink.snapshot().await[0].timestamp().unwrap();
        assert!(ts >= before && ts <= after);
    }

    #[tokio::test]
    async fn test_invalid_measurements_rejected() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        assert!(matches!(
            sink.submit("", 1.0, &[]).await,
            Err(VmError::InvalidMeasurement(_))
        ));
        assert!(matches!(
            sink.submit("rows_total", f64::NAN, &[]).await,
            Err(VmError::InvalidMeasurement(_))
        ));
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        assert!(sink.flush().await);
        assert!(sink.flush().await);
        assert!(sink.is_empty().await);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_preserves_submission_order() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        for name in ["c", "a", "b"] {
            sink.submit_at(name, 1.0, &[], 1).await.unwrap();
        }
        assert!(sink.flush().await);

        let body = &transport.bodies()[0];
        let names: Vec<_> = body.lines().map(|l| &l[..1]).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_auto_flush_boundary() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config().with_batch_size(3), &transport);

        sink.submit("m", 1.0, &[]).await.unwrap();
        sink.submit("m", 2.0, &[]).await.unwrap();
        assert_eq!(transport.calls(), 0);
        assert_eq!(sink.len().await, 2);

        sink.submit("m", 3.0, &[]).await.unwrap();
        assert_eq!(transport.calls(), 1);
        assert!(sink.is_empty().await);
        assert_eq!(transport.bodies()[0].lines().count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_retries_until_success() {
        let transport = ScriptedTransport::failing(2);
        let sink = sink(config(), &transport);

        sink.submit_at("m", 1.0, &[], 1).await.unwrap();
        sink.submit_at("m", 2.0, &[], 2).await.unwrap();
        assert!(sink.flush().await);
        assert_eq!(transport.calls(), 3);
        assert!(sink.is_empty().await);

        // The buffer lock is held for the whole retry sequence, so nobody can
        // observe a partly drained buffer; each attempt carries the full batch.
        let expected = "m{job_name=\"job1\"} 1 1\nm{job_name=\"job1\"} 2 2\n";
        assert!(transport.bodies().iter().all(|b| b == expected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffer_stays_full_between_attempts() {
        let transport = ScriptedTransport::failing(2);
        let sink = sink(config().with_backoff_unit(Duration::from_secs(1)), &transport);
        sink.submit("m", 1.0, &[]).await.unwrap();

        let flushing = tokio::spawn({
            let sink = sink.clone();
            async move { sink.flush().await }
        });

        // First attempt fails, the flush sleeps before the second one
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(transport.calls(), 1);
        assert!(sink.inner.buffer.try_lock().is_err());

        assert!(flushing.await.unwrap());
        assert_eq!(transport.calls(), 3);
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_buffer_drains_only_on_success() {
        let transport = ScriptedTransport::failing(2);
        let sink = sink(config().with_max_retries(1), &transport);

        sink.submit("a", 1.0, &[]).await.unwrap();
        sink.submit("b", 2.0, &[]).await.unwrap();

        assert!(!sink.flush().await);
        assert_eq!(sink.len().await, 2);
        assert!(!sink.flush().await);
        assert_eq!(sink.len().await, 2);
        assert!(sink.flush().await);
        assert!(sink.is_empty().await);

        // Every attempt carried the full batch
        let bodies = transport.bodies();
        assert_eq!(bodies.len(), 3);
        assert!(bodies.iter().all(|b| b == &bodies[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_keep_everything() {
        let transport = ScriptedTransport::failing(usize::MAX);
        let sink = sink(config(), &transport);

        for i in 0..5 {
            sink.submit("m", i as f64, &[]).await.unwrap();
        }
        assert!(!sink.flush().await);
        assert_eq!(transport.calls(), 3);
        assert_eq!(sink.len().await, 5);
    }

    #[tokio::test]
    async fn test_failed_batch_joins_next_flush() {
        let transport = ScriptedTransport::failing(1);
        let sink = sink(config().with_max_retries(1), &transport);

        sink.submit_at("first", 1.0, &[], 1).await.unwrap();
        assert!(!sink.flush().await);
        sink.submit_at("second", 2.0, &[], 2).await.unwrap();
        assert!(sink.flush().await);

        let last = transport.bodies().pop().unwrap();
        assert_eq!(
            last,
            "first{job_name=\"job1\"} 1 1\nsecond{job_name=\"job1\"} 2 2\n"
        );
    }

    #[tokio::test]
    async fn test_scope_flushes_on_success() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        let (output, flushed) = sink
            .scope(|sink| async move {
                sink.submit("rows_total", 3.0, &[]).await?;
                Ok::<_, VmError>(7)
            })
            .await;

        assert_eq!(output.unwrap(), 7);
        assert!(flushed);
        assert_eq!(transport.calls(), 1);
        assert!(sink.is_empty().await);
    }

    #[tokio::test]
    async fn test_scope_flushes_on_error() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        let (output, flushed) = sink
            .scope(|sink| async move {
                sink.submit("job_errors_total", 1.0, &[]).await?;
                Err::<(), _>(VmError::Other("processing failed".to_string()))
            })
            .await;

        assert!(output.is_err());
        assert!(flushed);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_scope_with_nothing_buffered_sends_nothing() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config(), &transport);

        let ((), flushed) = sink.scope(|_| async {}).await;
        assert!(flushed);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_producers_flush_once_per_batch() {
        let transport = ScriptedTransport::failing(0);
        let sink = sink(config().with_batch_size(10), &transport);

        let mut handles = Vec::new();
        for worker in 0..4 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..5 {
                    sink.submit("m", (worker * 10 + i) as f64, &[]).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(transport.calls(), 2);
        assert!(transport.bodies().iter().all(|b| b.lines().count() == 10));
        assert!(sink.is_empty().await);
    }

    #[test]
    fn test_sample_respects_char_boundaries() {
        assert_eq!(sample("abc", 10), "abc");
        assert_eq!(sample("abcdef", 3), "abc");
        assert_eq!(sample("aé", 2), "a");
    }
}
