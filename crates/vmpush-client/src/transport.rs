//! Single-attempt delivery of encoded batches
//!
//! A [`Transport`] makes exactly one attempt per call; retrying is the job of
//! [`RetryPolicy`](crate::RetryPolicy). [`HttpTransport`] is the production
//! implementation: it POSTs to the store's Prometheus import endpoint over a
//! pooled `reqwest::Client` that lives as long as the transport.

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vmpush_core::{SinkConfig, VmError};

/// Content type of the exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Idle connections kept per host
const POOL_MAX_IDLE_PER_HOST: usize = 20;

/// Why a single delivery attempt failed. Every variant is retryable.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("unexpected status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("request failed: {0}")]
    Request(String),
}

/// Request body ready to send, possibly compressed
#[derive(Debug, Clone)]
pub struct Payload {
    body: Vec<u8>,
    content_encoding: Option<&'static str>,
    measurements: usize,
}

impl Payload {
    /// Uncompressed body
    pub fn plain(text: &str, measurements: usize) -> Self {
        Self {
            body: text.as_bytes().to_vec(),
            content_encoding: None,
            measurements,
        }
    }

    /// Gzip-compressed body
    pub fn gzip(text: &str, measurements: usize) -> std::io::Result<Self> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes())?;
        Ok(Self {
            body: encoder.finish()?,
            content_encoding: Some("gzip"),
            measurements,
        })
    }

    /// Build a payload, compressing when asked. A compression failure falls
    /// back to a plain body.
    pub fn prepare(text: &str, compress: bool, measurements: usize) -> Self {
        if !compress {
            return Self::plain(text, measurements);
        }
        match Self::gzip(text, measurements) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!("Gzip compression failed, sending uncompressed: {}", e);
                Self::plain(text, measurements)
            }
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_encoding(&self) -> Option<&'static str> {
        self.content_encoding
    }

    /// Number of measurements encoded in the body
    pub fn measurements(&self) -> usize {
        self.measurements
    }
}

/// One delivery attempt to the metrics store
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &Payload) -> Result<(), DeliveryError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, payload: &Payload) -> Result<(), DeliveryError> {
        (**self).send(payload).await
    }
}

/// HTTP transport for the Prometheus import endpoint
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    credentials: Option<(String, String)>,
}

impl HttpTransport {
    /// Build the transport and its connection pool
    pub fn new(config: &SinkConfig) -> vmpush_core::Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| VmError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let credentials = config
            .credentials()
            .map(|(user, pass)| (user.to_string(), pass.to_string()));

        match &credentials {
            Some((user, _)) => {
                tracing::info!("Basic authentication configured for user: {}", user)
            }
            None => tracing::info!("No authentication configured"),
        }
        if !config.verify_tls {
            tracing::debug!("TLS certificate verification disabled");
        }

        Ok(Self {
            client,
            url: config.import_url(),
            timeout: config.request_timeout(),
            credentials,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn classify(&self, error: reqwest::Error) -> DeliveryError {
        if error.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else if error.is_connect() {
            DeliveryError::Connection(error.to_string())
        } else {
            DeliveryError::Request(error.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &Payload) -> Result<(), DeliveryError> {
        tracing::debug!(
            "POST {} ({} measurements, {} bytes)",
            self.url,
            payload.measurements(),
            payload.body().len()
        );

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, TEXT_CONTENT_TYPE)
            .body(payload.body().to_vec());

        if let Some(encoding) = payload.content_encoding() {
            request = request.header(CONTENT_ENCODING, encoding);
        }
        if let Some((user, pass)) = &self.credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        tracing::debug!("Metrics store responded with status {}", status);

        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown".to_string());
        Err(DeliveryError::BadStatus {
            status: status.as_u16(),
            body,
        })
    }
}
