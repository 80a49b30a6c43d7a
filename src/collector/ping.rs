//! Ping probe: shells out to ping(8) and reports latency and loss samples.

use regex::Regex;
use std::process::Command;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{now_seconds, CollectorConfig, Reporter};
use crate::sample::Sample;

/// Names of the samples the ping probe generates.
pub const SAMPLE_PING_FAILED: &str = "ping_failed";
pub const SAMPLE_PING_MIN: &str = "ping_min";
pub const SAMPLE_PING_AVG: &str = "ping_avg";
pub const SAMPLE_PING_MAX: &str = "ping_max";
pub const SAMPLE_PING_PACKET_LOSS: &str = "ping_packet_loss";

// Matches "5 packets transmitted, 5 received, 0% packet loss, time 4005ms".
fn count_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(\d+) packets transmitted, (\d+) received").unwrap())
}

// Matches "rtt min/avg/max/mdev = 10.694/13.969/17.825/2.941 ms".
fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^rtt min/avg/max/mdev = (\S+)\s+(\S+)").unwrap())
}

#[derive(Debug, Default, PartialEq)]
pub struct PingStats {
    /// The command failed to produce usable output.
    pub command_failed: bool,

    /// Minimum, average, and maximum RTT in milliseconds.
    pub min_reply_ms: f32,
    pub avg_reply_ms: f32,
    pub max_reply_ms: f32,

    /// Fraction of pings without responses, in [0.0, 1.0].
    pub packet_loss: f32,
}

fn parse_floats(strs: &[&str]) -> Option<Vec<f32>> {
    strs.iter().map(|s| s.parse().ok()).collect()
}

/// Parses ping's summary output.
fn parse_ping_output(out: &str) -> PingStats {
    let mut stats = PingStats::default();

    let Some(counts) = count_regex().captures(out) else {
        tracing::warn!("didn't find ping count in {out:?}");
        stats.command_failed = true;
        return stats;
    };
    let Some(counts) = parse_floats(&[&counts[1], &counts[2]]) else {
        tracing::warn!("failed to parse ping counts from {:?}", &counts[0]);
        stats.command_failed = true;
        return stats;
    };
    let (tx, rx) = (counts[0], counts[1]);
    if tx > 0.0 {
        stats.packet_loss = (tx - rx) / tx;
    }

    // The line with times only shows up if at least one reply was received.
    if rx > 0.0 {
        let Some(times) = time_regex().captures(out) else {
            tracing::warn!("didn't find ping times in {out:?}");
            stats.command_failed = true;
            return stats;
        };
        let fields: Vec<&str> = times[1].split('/').collect();
        match parse_floats(&fields) {
            Some(values) if values.len() == 4 => {
                stats.min_reply_ms = values[0];
                stats.avg_reply_ms = values[1];
                stats.max_reply_ms = values[2];
            }
            _ => {
                tracing::warn!("failed to parse ping times from {:?}", &times[1]);
                stats.command_failed = true;
            }
        }
    }

    stats
}

fn get_ping_stats(cfg: &CollectorConfig) -> PingStats {
    let delay_sec = format!("{:.3}", cfg.ping_delay_ms as f64 / 1000.0);
    let output = Command::new("ping")
        .args([
            "-c",
            &cfg.ping_count.to_string(),
            "-i",
            &delay_sec,
            "-w",
            &cfg.ping_timeout_sec.to_string(),
            "-q",
            &cfg.ping_host,
        ])
        .output();

    match output {
        Ok(output) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            parse_ping_output(&text)
        }
        Err(e) => {
            tracing::warn!("ping command failed: {e}");
            PingStats {
                command_failed: true,
                ..PingStats::default()
            }
        }
    }
}

/// Pings the configured host forever, reporting one set of samples per
/// interval.
pub fn run_ping_loop(cfg: Arc<CollectorConfig>, reporter: Arc<Reporter>) {
    loop {
        let start = now_seconds();
        let started = std::time::Instant::now();
        let stats = get_ping_stats(&cfg);

        let failed = if stats.command_failed { 1.0 } else { 0.0 };
        reporter.report_samples(vec![
            Sample::new(start, &cfg.source, SAMPLE_PING_FAILED, failed),
            Sample::new(start, &cfg.source, SAMPLE_PING_MIN, stats.min_reply_ms),
            Sample::new(start, &cfg.source, SAMPLE_PING_AVG, stats.avg_reply_ms),
            Sample::new(start, &cfg.source, SAMPLE_PING_MAX, stats.max_reply_ms),
            Sample::new(start, &cfg.source, SAMPLE_PING_PACKET_LOSS, stats.packet_loss),
        ]);

        let interval = Duration::from_secs(cfg.ping_sample_interval_sec);
        if let Some(left) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(left);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping_output() {
        let out = "PING example.com (93.184.216.34) 56(84) bytes of data.\n\n\
                   --- example.com ping statistics ---\n\
                   5 packets transmitted, 5 received, 0% packet loss, time 4005ms\n\
                   rtt min/avg/max/mdev = 10.694/13.969/17.825/2.941 ms\n";
        assert_eq!(
            parse_ping_output(out),
            PingStats {
                command_failed: false,
                min_reply_ms: 10.694,
                avg_reply_ms: 13.969,
                max_reply_ms: 17.825,
                packet_loss: 0.0,
            }
        );
    }

    #[test]
    fn test_parse_ping_output_with_loss() {
        let out = "5 packets transmitted, 4 received, 20% packet loss, time 4010ms\n\
                   rtt min/avg/max/mdev = 10.0/12.5/15.0/2.0 ms\n";
        let stats = parse_ping_output(out);
        assert!(!stats.command_failed);
        assert_eq!(stats.packet_loss, 0.2);
        assert_eq!(stats.avg_reply_ms, 12.5);
    }

    #[test]
    fn test_parse_ping_output_all_lost() {
        // No replies, so no rtt line; that's not a failure.
        let out = "5 packets transmitted, 0 received, 100% packet loss, time 4100ms\n";
        assert_eq!(
            parse_ping_output(out),
            PingStats {
                command_failed: false,
                min_reply_ms: 0.0,
                avg_reply_ms: 0.0,
                max_reply_ms: 0.0,
                packet_loss: 1.0,
            }
        );
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(parse_ping_output("ping: unknown host nowhere.invalid\n").command_failed);
    }

    #[test]
    fn test_parse_ping_output_missing_times() {
        // Replies were received but the summary line is absent.
        let out = "5 packets transmitted, 5 received, 0% packet loss, time 4005ms\n";
        assert!(parse_ping_output(out).command_failed);
    }
}
