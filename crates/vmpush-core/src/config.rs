//! Sink configuration
//!
//! A [`SinkConfig`] names the remote store, the job identity stamped on every
//! measurement, optional credentials, and the batching/retry knobs. It can be
//! built in code or loaded from a TOML file such as:
//!
//! ```toml
//! endpoint_url = "https://metrics.internal:8428"
//! job_name = "nightly-usage-report"
//! username = "ingest"
//! password = "s3cret"
//! batch_size = 500
//! ```
//!
//! Misconfiguration is reported by [`SinkConfig::validate`] so callers fail
//! at construction time instead of at the first flush. [`SinkConfig::from_file`]
//! parses without validating, for callers that layer overrides on top.
//!
//! Durations are stored in milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::{Result, VmError};

/// Path of the Prometheus text import endpoint, appended to `endpoint_url`
pub const IMPORT_PATH: &str = "/api/v1/import/prometheus";

/// Configuration for a metrics sink
#[derive(Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Base URL of the time-series store (scheme, host, port)
    #[serde(default)]
    pub endpoint_url: String,

    /// Identity injected as the `job_name` label on every measurement
    #[serde(default)]
    pub job_name: String,

    /// Basic-auth user; requires `password`
    #[serde(default)]
    pub username: Option<String>,

    /// Basic-auth password; requires `username`
    #[serde(default, skip_serializing)]
    pub password: Option<String>,

    /// Verify the server's TLS certificate
    #[serde(default)]
    pub verify_tls: bool,

    /// Per-attempt request timeout in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Delivery attempts per flush (the first attempt always happens)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Gzip request bodies
    #[serde(default = "default_enable_compression")]
    pub enable_compression: bool,

    /// Buffer length that triggers an automatic flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Length of one backoff unit in milliseconds; the wait after attempt
    /// `n` is `2^n` units
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

// Default value providers
fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_enable_compression() -> bool {
    true
}

fn default_batch_size() -> usize {
    1000
}

fn default_backoff_unit_ms() -> u64 {
    1000
}

impl SinkConfig {
    /// Create a configuration with default knobs
    pub fn new(endpoint_url: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            job_name: job_name.into(),
            username: None,
            password: None,
            verify_tls: false,
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            enable_compression: default_enable_compression(),
            batch_size: default_batch_size(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }

    /// Load configuration from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without validating; missing fields take their
    /// defaults, so an incomplete file can be completed before
    /// [`validate`](Self::validate)
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = millis(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_compression(mut self, enable: bool) -> Self {
        self.enable_compression = enable;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit_ms = millis(unit);
        self
    }

    /// Check the configuration for errors that would otherwise surface at
    /// the first flush
    pub fn validate(&self) -> Result<()> {
        if self.job_name.trim().is_empty() {
            return Err(VmError::Config("job_name must not be empty".to_string()));
        }

        let url = Url::parse(&self.endpoint_url).map_err(|e| {
            VmError::Config(format!("invalid endpoint_url '{}': {}", self.endpoint_url, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(VmError::Config(format!(
                "endpoint_url must use http or https, got '{}'",
                url.scheme()
            )));
        }

        if self.request_timeout_ms == 0 {
            return Err(VmError::Config(
                "request timeout must be at least 1ms".to_string(),
            ));
        }

        if self.batch_size == 0 {
            return Err(VmError::Config("batch_size must be at least 1".to_string()));
        }

        match (&self.username, &self.password) {
            (Some(_), None) => Err(VmError::Config(
                "username is set but password is missing".to_string(),
            )),
            (None, Some(_)) => Err(VmError::Config(
                "password is set but username is missing".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Full URL of the import endpoint
    pub fn import_url(&self) -> String {
        format!("{}{}", self.endpoint_url.trim_end_matches('/'), IMPORT_PATH)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// Basic-auth credentials, when both halves are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("job_name", &self.job_name)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("verify_tls", &self.verify_tls)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("enable_compression", &self.enable_compression)
            .field("batch_size", &self.batch_size)
            .field("backoff_unit_ms", &self.backoff_unit_ms)
            .finish()
    }
}
