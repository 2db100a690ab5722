//! # vmpush-client
//!
//! Client side of the metrics pipeline: measurements go into a
//! [`MetricsSink`], which batches them, renders them in the Prometheus text
//! exposition format and POSTs them to a VictoriaMetrics-compatible import
//! endpoint.
//!
//! ## Delivery guarantees
//!
//! - A batch leaves the buffer only after the store answered 200 or 204
//! - Failed batches stay buffered and ride along with the next flush
//! - Delivery failures are reported as `false`, never as errors
//! - Each flush makes at most `max_retries` attempts, backing off 2, 4, 8...
//!   units between them
//!
//! Bad measurements (empty names, non-finite values) are rejected at
//! submission with [`VmError::InvalidMeasurement`](vmpush_core::VmError).

mod encoder;
mod measurement;
mod retry;
mod sink;
mod transport;

pub use encoder::{encode, encode_line};
pub use measurement::{Labels, Measurement};
pub use retry::RetryPolicy;
pub use sink::MetricsSink;
pub use transport::{DeliveryError, HttpTransport, Payload, Transport, TEXT_CONTENT_TYPE};

/// Label that carries the sink's identity on every measurement
pub const JOB_NAME_LABEL: &str = "job_name";
