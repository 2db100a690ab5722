//! Measurement value type

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use vmpush_core::{Result, VmError};

/// Label set of a measurement, kept sorted by key so encoding is deterministic
pub type Labels = BTreeMap<String, String>;

/// One named, labeled, timestamped numeric observation
///
/// Construction validates the measurement: the name must match
/// `[a-zA-Z_:][a-zA-Z0-9_:]*`, the value must be finite, and every label key
/// must match `[a-zA-Z_][a-zA-Z0-9_]*`. Bad input is rejected, never coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    name: String,
    value: f64,
    #[serde(default)]
    labels: Labels,
    /// Milliseconds since the Unix epoch
    #[serde(default)]
    timestamp: Option<i64>,
}

impl Measurement {
    /// Create an unlabeled, unstamped measurement
    pub fn new(name: impl Into<String>, value: f64) -> Result<Self> {
        let measurement = Self {
            name: name.into(),
            value,
            labels: Labels::new(),
            timestamp: None,
        };
        measurement.validate()?;
        Ok(measurement)
    }

    /// Check the invariants that construction enforces; deserialized
    /// measurements skip construction and must be checked before submission
    pub fn validate(&self) -> Result<()> {
        if !is_metric_name(&self.name) {
            return Err(VmError::InvalidMeasurement(format!(
                "invalid metric name '{}'",
                self.name
            )));
        }
        if !self.value.is_finite() {
            return Err(VmError::InvalidMeasurement(format!(
                "value of '{}' must be finite, got {}",
                self.name, self.value
            )));
        }
        if let Some(key) = self.labels.keys().find(|k| !is_label_key(k)) {
            return Err(VmError::InvalidMeasurement(format!(
                "invalid label key '{}' on '{}'",
                key, self.name
            )));
        }
        Ok(())
    }

    /// Add one label, replacing any previous value for the key
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if !is_label_key(&key) {
            return Err(VmError::InvalidMeasurement(format!(
                "invalid label key '{}' on '{}'",
                key, self.name
            )));
        }
        self.labels.insert(key, value.into());
        Ok(self)
    }

    /// Add several labels
    pub fn with_labels<I, K, V>(self, labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        labels
            .into_iter()
            .try_fold(self, |m, (k, v)| m.with_label(k, v))
    }

    /// Pin the timestamp (epoch millis)
    pub fn at(mut self, timestamp_ms: i64) -> Self {
        self.timestamp = Some(timestamp_ms);
        self
    }

    /// Set the timestamp to now unless one was given
    pub(crate) fn stamped(mut self) -> Self {
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now().timestamp_millis());
        }
        self
    }

    /// Force a label, overriding whatever the caller supplied
    pub(crate) fn with_identity(mut self, job_name: &str) -> Self {
        self.labels
            .insert(crate::JOB_NAME_LABEL.to_string(), job_name.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }
}

/// `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// `[a-zA-Z_][a-zA-Z0-9_]*`
fn is_label_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
