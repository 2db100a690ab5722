//! # vmpush-core
//!
//! Shared building blocks for the vmpush metrics shipper:
//!
//! - [`SinkConfig`]: endpoint, identity, credentials and batching knobs,
//!   loaded from TOML or built in code and validated up front
//! - [`VmError`]: the error taxonomy (bad measurements, misconfiguration)
//! - [`fail_open`]: helpers for infrastructure work that must never take
//!   the surrounding job down with it

mod config;
mod error;
pub mod fail_open;

pub use config::{SinkConfig, IMPORT_PATH};
pub use error::{Result, VmError};
