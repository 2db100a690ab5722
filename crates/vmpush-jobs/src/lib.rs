//! # vmpush-jobs
//!
//! Instrumentation for batch jobs built on [`vmpush_client::MetricsSink`]:
//!
//! - Stage timing: one active stage at a time, each emitted as
//!   `stage_duration_seconds{stage=...}`
//! - Data quality: per-column null percentages and an overall score computed
//!   from counts the caller already has
//! - Job outcome: total duration, a completion counter and an error counter

mod quality;
mod recorder;

pub use quality::QualityReport;
pub use recorder::{
    JobMetrics, COLUMN_NULL_PERCENTAGE, DATA_QUALITY_SCORE, JOB_COMPLETED_TOTAL,
    JOB_DURATION_SECONDS, JOB_ERRORS_TOTAL, STAGE_DURATION_SECONDS,
};
