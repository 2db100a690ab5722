//! Bounded retries with exponential backoff

use std::time::Duration;
use tracing::{info, warn};
use vmpush_core::fail_open::fail_open_with_backoff;
use vmpush_core::SinkConfig;

use crate::transport::{Payload, Transport};

/// Drives a [`Transport`] through up to `max_retries` attempts
///
/// Attempt 1 runs immediately; after failed attempt `n` the policy waits
/// `2^n` backoff units. No jitter, no cap. Each call to [`deliver`] is an
/// independent sequence.
///
/// [`deliver`]: RetryPolicy::deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_unit: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_unit: Duration) -> Self {
        Self {
            max_retries,
            backoff_unit,
        }
    }

    pub fn from_config(config: &SinkConfig) -> Self {
        Self::new(config.max_retries, config.backoff_unit())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Deliver `payload`, returning whether any attempt succeeded
    pub async fn deliver<T>(&self, transport: &T, payload: &Payload) -> bool
    where
        T: Transport + ?Sized,
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 0u32;

        let delivered = fail_open_with_backoff(
            "metrics delivery",
            || {
                attempt += 1;
                let current = attempt;
                info!(
                    "Sending {} metrics (attempt {}/{})",
                    payload.measurements(),
                    current,
                    attempts
                );
                async move {
                    let result = transport.send(payload).await;
                    if result.is_ok() {
                        info!("Metrics delivered (attempt {})", current);
                    }
                    result
                }
            },
            self.max_retries,
            self.backoff_unit,
        )
        .await
        .is_some();

        if !delivered {
            warn!(
                "Giving up on {} metrics after {} attempts",
                payload.measurements(),
                attempts
            );
        }
        delivered
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
