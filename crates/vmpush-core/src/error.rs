//! Unified error types for vmpush

use thiserror::Error;

/// Unified error type for all vmpush operations
#[derive(Error, Debug)]
pub enum VmError {
    // Submission errors
    #[error("Invalid measurement: {0}")]
    InvalidMeasurement(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using VmError
pub type Result<T> = std::result::Result<T, VmError>;
