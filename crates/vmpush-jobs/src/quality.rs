//! Null-count based data quality scoring

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Outcome of a data quality computation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QualityReport {
    /// Every column had a usable null count
    Measured {
        /// `100 - mean(null_percentages)`
        quality_score: f64,
        /// Percentage of null values per column
        null_percentages: BTreeMap<String, f64>,
    },
    /// The counts could not be interpreted; nothing was recorded
    Degraded { reason: String },
}

impl QualityReport {
    /// Score the dataset from caller-supplied counts
    ///
    /// A column's null percentage is `nulls / total_rows * 100`, or 0 for an
    /// empty dataset. With no columns the mean is 0 and the score 100. A
    /// column without a count, or with more nulls than rows, degrades the
    /// whole report.
    pub fn compute<S: AsRef<str>>(
        columns: &[S],
        null_counts: &HashMap<String, u64>,
        total_rows: u64,
    ) -> Self {
        let mut null_percentages = BTreeMap::new();

        for column in columns {
            let column = column.as_ref();
            let Some(&nulls) = null_counts.get(column) else {
                return Self::Degraded {
                    reason: format!("no null count for column '{}'", column),
                };
            };
            if nulls > total_rows {
                return Self::Degraded {
                    reason: format!(
                        "column '{}' has {} nulls but only {} rows",
                        column, nulls, total_rows
                    ),
                };
            }

            let percentage = if total_rows > 0 {
                nulls as f64 / total_rows as f64 * 100.0
            } else {
                0.0
            };
            null_percentages.insert(column.to_string(), percentage);
        }

        let average = if null_percentages.is_empty() {
            0.0
        } else {
            null_percentages.values().sum::<f64>() / null_percentages.len() as f64
        };

        Self::Measured {
            quality_score: 100.0 - average,
            null_percentages,
        }
    }

    /// Score of the report; 0 when degraded
    pub fn quality_score(&self) -> f64 {
        match self {
            Self::Measured { quality_score, .. } => *quality_score,
            Self::Degraded { .. } => 0.0,
        }
    }

    /// Per-column null percentages; empty when degraded
    pub fn null_percentages(&self) -> BTreeMap<String, f64> {
        match self {
            Self::Measured {
                null_percentages, ..
            } => null_percentages.clone(),
            Self::Degraded { .. } => BTreeMap::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}
