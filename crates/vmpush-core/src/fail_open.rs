//! Fail-open utilities for graceful degradation
//!
//! Metrics shipping is infrastructure: a broken metrics store or a bad
//! measurement must never abort the job being measured. These helpers run an
//! operation, log the failure via `tracing::warn!` and hand back `None`
//! instead of an error.
//!
//! DO NOT use fail-open for:
//! - Configuration loading (misconfiguration must fail fast)
//! - Flush bookkeeping (the buffer must only drain on success)

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Execute an operation that should fail open
///
/// Logs the error on failure and returns `None`.
///
/// # Usage
///
/// ```no_run
/// use vmpush_core::fail_open::fail_open;
/// use vmpush_core::Result;
///
/// async fn record_stage() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let result = fail_open("stage_duration", || record_stage()).await;
///     // result is None if record_stage() failed, otherwise Some(())
/// }
/// ```
pub async fn fail_open<F, Fut, T, E>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Delay to wait after a failed attempt `attempt` (1-based): `unit * 2^attempt`
///
/// No jitter and no upper bound.
pub fn backoff_delay(attempt: u32, unit: Duration) -> Duration {
    unit.saturating_mul(2u32.saturating_pow(attempt))
}

/// Like [`fail_open`] but with exponential backoff retries
///
/// Runs the operation up to `max_attempts` times. The first attempt always
/// runs, even when `max_attempts` is 0 or 1. After failed attempt `n` the
/// helper sleeps for [`backoff_delay`]`(n, unit)` before trying again, so three
/// attempts with a one-second unit wait 2s and then 4s.
///
/// # Usage
///
/// ```no_run
/// use std::time::Duration;
/// use vmpush_core::fail_open::fail_open_with_backoff;
/// use vmpush_core::Result;
///
/// async fn post_batch() -> Result<u16> {
///     Ok(204)
/// }
///
/// async fn example() {
///     let result =
///         fail_open_with_backoff("post_batch", || post_batch(), 3, Duration::from_secs(1)).await;
/// }
/// ```
pub async fn fail_open_with_backoff<F, Fut, T, E>(
    operation_name: &str,
    mut f: F,
    max_attempts: u32,
    unit: Duration,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(val) => {
                debug!(
                    "{} succeeded (attempt {}/{})",
                    operation_name, attempt, max_attempts
                );
                return Some(val);
            }
            Err(e) => {
                if attempt == max_attempts {
                    warn!(
                        "{} failed after {} attempts (fail-open): {}",
                        operation_name, max_attempts, e
                    );
                    return None;
                }
                let delay = backoff_delay(attempt, unit);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    operation_name, attempt, max_attempts, delay, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    None
}
