//! Parsing of measurement files for `vmpush import`
//!
//! One measurement per line, either
//!
//! ```text
//! # comment
//! rows_total 42 dataset=sessions report_date=2024-05-01
//! {"name":"rows_total","value":42,"labels":{"dataset":"sessions"},"timestamp":1714521600000}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use anyhow::{anyhow, bail, Context, Result};
use vmpush_client::Measurement;

/// Parse one line; `Ok(None)` for blank and comment lines
pub fn parse_line(line: &str) -> Result<Option<Measurement>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if line.starts_with('{') {
        let measurement: Measurement =
            serde_json::from_str(line).context("invalid JSON measurement")?;
        measurement.validate()?;
        return Ok(Some(measurement));
    }

    let mut fields = line.split_whitespace();
    let name = fields.next().ok_or_else(|| anyhow!("missing metric name"))?;
    let value = fields
        .next()
        .ok_or_else(|| anyhow!("missing value for '{}'", name))?;
    let value: f64 = value
        .parse()
        .with_context(|| format!("invalid value '{}' for '{}'", value, name))?;

    let mut measurement = Measurement::new(name, value)?;
    for field in fields {
        let (key, value) = parse_label(field)?;
        measurement = measurement.with_label(key, value)?;
    }
    Ok(Some(measurement))
}

/// Parse a `key=value` label
pub fn parse_label(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("invalid label '{}', expected key=value", raw),
    }
}

/// Parse a whole document, reporting the line number of the first bad line
pub fn parse_document(content: &str) -> Result<Vec<Measurement>> {
    let mut measurements = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if let Some(measurement) =
            parse_line(line).with_context(|| format!("line {}", index + 1))?
        {
            measurements.push(measurement);
        }
    }
    Ok(measurements)
}
