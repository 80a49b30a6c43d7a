//! Collector configuration.

use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::CollectorError;

/// Collector settings, loaded from a JSON file. Missing fields keep their
/// defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectorConfig {
    /// Source identifier attached to locally generated samples.
    pub source: String,

    /// Address used to listen for local reports, e.g. ":4587".
    pub listen_address: String,

    /// Full URL to report samples to, e.g. "https://example.com/report".
    pub report_url: String,

    /// Shared secret used to sign reports.
    pub report_secret: String,

    /// Path of the JSON file storing not-yet-reported samples. Empty
    /// disables persistence.
    pub backing_file: String,

    /// Maximum samples per report request.
    pub report_batch_size: usize,

    /// Client timeout when talking to the server, in milliseconds.
    pub report_timeout_ms: u64,

    /// Wait before retrying after a failure, in milliseconds.
    pub report_retry_ms: u64,

    pub ping_sample_interval_sec: u64,
    /// Host to ping; empty disables the ping probe.
    pub ping_host: String,
    pub ping_count: u32,
    pub ping_delay_ms: u64,
    pub ping_timeout_sec: u64,

    /// Command printing power stats; empty disables the power probe.
    pub power_command: String,
    pub power_sample_interval_sec: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            source: String::new(),
            listen_address: ":4587".to_string(),
            report_url: String::new(),
            report_secret: String::new(),
            backing_file: String::new(),
            report_batch_size: 10,
            report_timeout_ms: 10_000,
            report_retry_ms: 10_000,
            ping_sample_interval_sec: 60,
            ping_host: String::new(),
            ping_count: 5,
            ping_delay_ms: 1_000,
            ping_timeout_sec: 20,
            power_command: String::new(),
            power_sample_interval_sec: 120,
        }
    }
}

impl CollectorConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CollectorError> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}
