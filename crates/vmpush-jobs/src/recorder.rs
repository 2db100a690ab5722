//! Stage timing and job outcome recording

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vmpush_client::MetricsSink;
use vmpush_core::fail_open::fail_open;

use crate::quality::QualityReport;

pub const STAGE_DURATION_SECONDS: &str = "stage_duration_seconds";
pub const COLUMN_NULL_PERCENTAGE: &str = "column_null_percentage";
pub const DATA_QUALITY_SCORE: &str = "data_quality_score";
pub const JOB_DURATION_SECONDS: &str = "job_duration_seconds";
pub const JOB_COMPLETED_TOTAL: &str = "job_completed_total";
pub const JOB_ERRORS_TOTAL: &str = "job_errors_total";

/// Stage currently being timed
#[derive(Debug, Clone)]
struct ActiveStage {
    name: String,
    started_at: Instant,
}

/// Instrumentation for one run of a batch job
///
/// Times named stages (one at a time, no nesting), scores data quality and
/// records the job's outcome, all as measurements on a [`MetricsSink`].
/// Recording never fails the job: submission errors are logged and dropped.
#[derive(Debug)]
pub struct JobMetrics {
    sink: MetricsSink,
    namespace: Option<String>,
    job_started_at: Instant,
    current: Option<ActiveStage>,
}

impl JobMetrics {
    /// Start instrumenting a job; the job clock starts now
    pub fn new(sink: MetricsSink) -> Self {
        Self {
            sink,
            namespace: None,
            job_started_at: Instant::now(),
            current: None,
        }
    }

    /// Prefix every metric name, e.g. `glue` → `glue_stage_duration_seconds`
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn sink(&self) -> &MetricsSink {
        &self.sink
    }

    /// Name of the stage being timed, if any
    pub fn current_stage(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.name.as_str())
    }

    /// Time spent since construction
    pub fn elapsed(&self) -> Duration {
        self.job_started_at.elapsed()
    }

    fn metric(&self, base: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}_{}", ns, base),
            None => base.to_string(),
        }
    }

    async fn record(&self, base: &str, value: f64, labels: &[(&str, &str)]) {
        let name = self.metric(base);
        fail_open(&name, || self.sink.submit(&name, value, labels)).await;
    }

    /// Begin timing `name`, ending the active stage first
    pub async fn start_stage(&mut self, name: &str) {
        if let Some(active) = self.current.clone() {
            self.end_stage(&active.name).await;
        }

        info!("Starting stage: {}", name);
        self.current = Some(ActiveStage {
            name: name.to_string(),
            started_at: Instant::now(),
        });
    }

    /// Stop timing and record the stage duration under `name`
    ///
    /// No-op (returning `None`) when no stage is active.
    pub async fn end_stage(&mut self, name: &str) -> Option<Duration> {
        let active = self.current.take()?;
        if active.name != name {
            debug!(
                "Ending stage '{}' while '{}' was active",
                name, active.name
            );
        }

        let duration = active.started_at.elapsed();
        self.record(
            STAGE_DURATION_SECONDS,
            duration.as_secs_f64(),
            &[("stage", name)],
        )
        .await;
        info!(
            "Completed stage: {} in {:.2}s",
            name,
            duration.as_secs_f64()
        );
        Some(duration)
    }

    /// Record per-column null percentages and the overall quality score
    ///
    /// When the counts cannot be interpreted the result is
    /// [`QualityReport::Degraded`] and nothing is recorded.
    pub async fn record_data_quality<S: AsRef<str>>(
        &self,
        dataset: &str,
        columns: &[S],
        null_counts: &HashMap<String, u64>,
        total_rows: u64,
    ) -> QualityReport {
        let report = QualityReport::compute(columns, null_counts, total_rows);

        match &report {
            QualityReport::Measured {
                quality_score,
                null_percentages,
            } => {
                for column in columns {
                    let column = column.as_ref();
                    let Some(percentage) = null_percentages.get(column) else {
                        continue;
                    };
                    self.record(
                        COLUMN_NULL_PERCENTAGE,
                        *percentage,
                        &[("dataset", dataset), ("column", column)],
                    )
                    .await;
                }
                self.record(DATA_QUALITY_SCORE, *quality_score, &[("dataset", dataset)])
                    .await;
                info!(
                    "Data quality for {}: {:.2} over {} columns",
                    dataset,
                    quality_score,
                    null_percentages.len()
                );
            }
            QualityReport::Degraded { reason } => {
                warn!("Error calculating data quality for {}: {}", dataset, reason);
            }
        }

        report
    }

    /// Record the job's total duration and outcome
    ///
    /// An error counter is recorded only when `error_message` is given.
    pub async fn record_job_completion(&self, status: &str, error_message: Option<&str>) {
        let duration = self.elapsed();

        self.record(
            JOB_DURATION_SECONDS,
            duration.as_secs_f64(),
            &[("status", status)],
        )
        .await;
        self.record(JOB_COMPLETED_TOTAL, 1.0, &[("status", status)])
            .await;

        if let Some(message) = error_message {
            warn!("Job finished with error: {}", message);
            self.record(JOB_ERRORS_TOTAL, 1.0, &[("error_type", "processing_error")])
                .await;
        }

        info!(
            "Job {} completed with status {} in {:.2}s",
            self.sink.job_name(),
            status,
            duration.as_secs_f64()
        );
    }
}
