//! Server configuration.
//!
//! Loaded once at boot from a JSON file and passed explicitly into
//! components. Unknown fields reject the config.

use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

use crate::engine::alert::Condition;

/// Hardcoded secret used when running in dev mode.
pub const DEV_SECRET: &str = "secret";

const DEFAULT_TIME_ZONE: &str = "America/Los_Angeles";
const DEFAULT_DAYS_TO_KEEP: i64 = 3;
const DEFAULT_FULL_DAY_DELAY_SEC: i64 = 24 * 3600;
const DEFAULT_GRAPH_SEC: i64 = 7200;
const DEFAULT_REPORT_SEC: i64 = 300;

/// Config error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unknown time zone {0:?}")]
    BadTimeZone(String),
    #[error("graph {0:?} has a range with {1} values")]
    BadRange(String, usize),
}

/// A line within a graph.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraphLineConfig {
    /// Label displayed on the graph.
    pub label: String,
    /// Source and name of the sampled series.
    pub source: String,
    pub name: String,
}

/// Configuration for an individual graph.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GraphConfig {
    pub title: String,

    /// Human units used to label the vertical axis.
    #[serde(default)]
    pub units: String,

    /// Seconds of data to graph.
    #[serde(default)]
    pub seconds: i64,

    /// Empty: the Y-axis range is automatic. One value: the minimum. Two
    /// values: minimum and maximum.
    #[serde(default)]
    pub range: Vec<f32>,

    /// Graph uses less vertical space than usual.
    #[serde(default)]
    pub short: bool,

    /// Reporting interval in seconds; feeds the query planner's choice of
    /// granularity.
    #[serde(default)]
    pub report_seconds: i64,

    pub lines: Vec<GraphLineConfig>,
}

/// User-configurable top-level settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Cloud project this deployment belongs to.
    #[serde(default)]
    pub project_id: String,

    /// Secret the collector signs reports with.
    #[serde(default)]
    pub report_secret: String,

    /// Email addresses of authorized users.
    #[serde(default)]
    pub users: Vec<String>,

    /// Time zone defining day boundaries, e.g. "America/Los_Angeles".
    #[serde(default)]
    pub time_zone: String,

    /// Address alerts are sent from.
    #[serde(default)]
    pub alert_sender: String,

    /// Addresses alerts are sent to.
    #[serde(default)]
    pub alert_recipients: Vec<String>,

    /// Conditions that trigger alerts.
    #[serde(default)]
    pub alert_conditions: Vec<Condition>,

    /// Page title.
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub graphs: Vec<GraphConfig>,

    /// Days of fully-summarized raw samples to keep; older ones are purged.
    #[serde(default)]
    pub days_to_keep: i64,

    /// Seconds to wait after the end of a day before assuming no more of its
    /// samples will arrive.
    #[serde(default)]
    pub full_day_delay_seconds: i64,
}

impl Config {
    /// Loads the config, applies defaults, and resolves the time zone.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<(Self, chrono_tz::Tz), ConfigError> {
        let file = File::open(path)?;
        let cfg: Config = serde_json::from_reader(BufReader::new(file))?;
        cfg.finish()
    }

    fn finish(mut self) -> Result<(Self, chrono_tz::Tz), ConfigError> {
        if self.time_zone.is_empty() {
            self.time_zone = DEFAULT_TIME_ZONE.to_string();
        }
        if self.days_to_keep <= 0 {
            self.days_to_keep = DEFAULT_DAYS_TO_KEEP;
        }
        if self.full_day_delay_seconds <= 0 {
            self.full_day_delay_seconds = DEFAULT_FULL_DAY_DELAY_SEC;
        }
        for graph in &mut self.graphs {
            if graph.seconds <= 0 {
                graph.seconds = DEFAULT_GRAPH_SEC;
            }
            if graph.report_seconds <= 0 {
                graph.report_seconds = DEFAULT_REPORT_SEC;
            }
            if graph.range.len() > 2 {
                return Err(ConfigError::BadRange(graph.title.clone(), graph.range.len()));
            }
        }

        let tz: chrono_tz::Tz = self
            .time_zone
            .parse()
            .map_err(|_| ConfigError::BadTimeZone(self.time_zone.clone()))?;
        Ok((self, tz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::alert::CondOp;

    fn parse(json: &str) -> Result<(Config, chrono_tz::Tz), ConfigError> {
        let cfg: Config = serde_json::from_str(json)?;
        cfg.finish()
    }

    #[test]
    fn test_load_full_config() {
        let (cfg, tz) = parse(
            r#"{
                "projectId": "home-123",
                "reportSecret": "hunter2",
                "users": ["me@example.com"],
                "timeZone": "America/New_York",
                "alertSender": "alerts@example.com",
                "alertRecipients": ["me@example.com"],
                "alertConditions": [
                    {"source": "garage", "name": "temp", "op": "lt", "value": 5.0},
                    {"source": "garage", "name": "temp", "op": "ot", "value": 600}
                ],
                "title": "Home",
                "graphs": [{
                    "title": "Temperature",
                    "units": "deg F",
                    "seconds": 3600,
                    "range": [30, 90],
                    "short": true,
                    "reportSeconds": 60,
                    "lines": [{"label": "Garage", "source": "garage", "name": "temp"}]
                }],
                "daysToKeep": 5,
                "fullDayDelaySeconds": 7200
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.project_id, "home-123");
        assert_eq!(tz, chrono_tz::America::New_York);
        assert_eq!(cfg.alert_conditions.len(), 2);
        assert_eq!(cfg.alert_conditions[0].op, CondOp::Lt);
        assert_eq!(cfg.alert_conditions[1].op, CondOp::Ot);
        assert_eq!(cfg.days_to_keep, 5);
        assert_eq!(cfg.full_day_delay_seconds, 7200);
        assert_eq!(cfg.graphs[0].range, vec![30.0, 90.0]);
        assert_eq!(cfg.graphs[0].lines[0].label, "Garage");
    }

    #[test]
    fn test_defaults() {
        let (cfg, tz) = parse(r#"{"graphs": [{"title": "t", "lines": []}]}"#).unwrap();
        assert_eq!(cfg.time_zone, "America/Los_Angeles");
        assert_eq!(tz, chrono_tz::America::Los_Angeles);
        assert_eq!(cfg.days_to_keep, 3);
        assert_eq!(cfg.full_day_delay_seconds, 24 * 3600);
        assert_eq!(cfg.graphs[0].seconds, 7200);
        assert_eq!(cfg.graphs[0].report_seconds, 300);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(parse(r#"{"reportSecrets": "oops"}"#).is_err());
        assert!(parse(r#"{"graphs": [{"title": "t", "lines": [], "color": "red"}]}"#).is_err());
    }

    #[test]
    fn test_rejects_bad_operator() {
        assert!(parse(
            r#"{"alertConditions": [{"source": "s", "name": "n", "op": "contains", "value": 1}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_rejects_bad_time_zone() {
        assert!(matches!(
            parse(r#"{"timeZone": "Mars/Olympus_Mons"}"#),
            Err(ConfigError::BadTimeZone(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_range() {
        assert!(matches!(
            parse(r#"{"graphs": [{"title": "t", "range": [1, 2, 3], "lines": []}]}"#),
            Err(ConfigError::BadRange(_, 3))
        ));
    }
}
