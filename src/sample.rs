//! Sample model and wire codec.
//!
//! A sample travels between the collector and the server as a pipe-delimited
//! line: `"{unix}|{source}|{name}|{value}"`. When a line omits the leading
//! timestamp (`"{source}|{name}|{value}"`), the parser substitutes a caller
//! supplied reference time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Sample codec error types.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("bad sample line {line:?}: {reason}")]
    BadSample { line: String, reason: String },
}

/// A single measurement for a `(source, name)` series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// When the measurement was taken, at second precision.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub name: String,
    pub value: f32,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, source: &str, name: &str, value: f32) -> Self {
        Self {
            timestamp,
            source: source.to_string(),
            name: name.to_string(),
            value,
        }
    }

    /// Parses a wire line. `reference` supplies the timestamp for the
    /// three-field form.
    pub fn parse(line: &str, reference: DateTime<Utc>) -> Result<Self, SampleError> {
        let bad = |reason: &str| SampleError::BadSample {
            line: line.to_string(),
            reason: reason.to_string(),
        };

        let fields: Vec<&str> = line.split('|').collect();
        let (timestamp, source, name, value) = match fields.as_slice() {
            [ts, source, name, value] => {
                let unix: i64 = ts.parse().map_err(|_| bad("unparseable timestamp"))?;
                let ts = DateTime::from_timestamp(unix, 0).ok_or_else(|| bad("timestamp out of range"))?;
                (ts, source, name, value)
            }
            [source, name, value] => {
                let unix = reference.timestamp();
                let ts = DateTime::from_timestamp(unix, 0).ok_or_else(|| bad("reference out of range"))?;
                (ts, source, name, value)
            }
            _ => return Err(bad("expected 3 or 4 fields")),
        };

        let value: f32 = value.parse().map_err(|_| bad("unparseable value"))?;
        Ok(Self {
            timestamp,
            source: source.to_string(),
            name: name.to_string(),
            value,
        })
    }

    /// Serializes to the four-field wire form. The value uses the shortest
    /// decimal that round-trips the f32.
    pub fn to_line(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.timestamp.timestamp(),
            self.source,
            self.name,
            self.value
        )
    }

    /// Entity-store identity. This format cannot be changed.
    pub fn key(&self) -> String {
        format!("{}|{}|{}", self.timestamp.timestamp(), self.source, self.name)
    }
}

/// Joins serialized samples into a report payload.
pub fn join_samples(samples: &[Sample]) -> String {
    samples
        .iter()
        .map(Sample::to_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Computes the report signature: lowercase hex SHA-256 of `"{data}|{secret}"`.
pub fn report_signature(data: &str, secret: &str) -> String {
    hex::encode(Sha256::digest(format!("{data}|{secret}")))
}
