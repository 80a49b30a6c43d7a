//! Power probe: runs a user-supplied command printing `key value` lines and
//! reports UPS stats.

use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use super::{now_seconds, CollectorConfig, Reporter};
use crate::sample::Sample;

/// Names of the samples the power probe generates.
pub const SAMPLE_POWER_ON_LINE: &str = "power_on_line";
pub const SAMPLE_POWER_LINE_VOLTAGE: &str = "power_line_voltage";
pub const SAMPLE_POWER_LOAD_PERCENT: &str = "power_load_percent";
pub const SAMPLE_POWER_BATTERY_PERCENT: &str = "power_battery_percent";

#[derive(Debug, Default, PartialEq)]
pub struct PowerStats {
    /// The system is currently on line power.
    pub on_line: bool,

    pub line_voltage: f32,

    /// Percent load capacity in [0.0, 100.0].
    pub load_percent: f32,

    /// Battery charge percent in [0.0, 100.0].
    pub battery_percent: f32,
}

/// Parses the power command's `key value` output. Malformed or unknown
/// lines are logged and skipped.
fn parse_power_output(out: &str) -> PowerStats {
    let mut stats = PowerStats::default();
    for line in out.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [key, value] = fields.as_slice() else {
            if !fields.is_empty() {
                tracing::warn!("skipping bad power stats line {line:?}");
            }
            continue;
        };
        let Ok(value) = value.parse::<f32>() else {
            tracing::warn!("unable to parse value {value:?} for power stat {key:?}");
            continue;
        };
        match *key {
            "on_line" => stats.on_line = value > 0.0,
            "line_voltage" => stats.line_voltage = value,
            "load_percent" => stats.load_percent = value,
            "battery_percent" => stats.battery_percent = value,
            _ => tracing::warn!("ignoring unknown power stat {key:?}"),
        }
    }
    stats
}

/// Runs the configured power command forever, reporting one set of samples
/// per interval. Command failures skip the interval.
pub fn run_power_loop(cfg: Arc<CollectorConfig>, reporter: Arc<Reporter>) {
    loop {
        let start = now_seconds();
        let started = std::time::Instant::now();

        match Command::new(&cfg.power_command).output() {
            Ok(output) if output.status.success() => {
                let stats = parse_power_output(&String::from_utf8_lossy(&output.stdout));
                let on_line = if stats.on_line { 1.0 } else { 0.0 };
                reporter.report_samples(vec![
                    Sample::new(start, &cfg.source, SAMPLE_POWER_ON_LINE, on_line),
                    Sample::new(start, &cfg.source, SAMPLE_POWER_LINE_VOLTAGE, stats.line_voltage),
                    Sample::new(start, &cfg.source, SAMPLE_POWER_LOAD_PERCENT, stats.load_percent),
                    Sample::new(start, &cfg.source, SAMPLE_POWER_BATTERY_PERCENT, stats.battery_percent),
                ]);
            }
            Ok(_) | Err(_) => {
                tracing::warn!("power command {:?} failed", cfg.power_command);
            }
        }

        let interval = Duration::from_secs(cfg.power_sample_interval_sec);
        if let Some(left) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(left);
        }
    }
}
