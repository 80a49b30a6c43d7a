//! Persisted entity types for the storage engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::{Entity, Props};
use crate::sample::Sample;

impl Entity for Sample {
    fn key(&self) -> String {
        Sample::key(self)
    }

    fn props(&self) -> Props {
        Props {
            timestamp: Some(self.timestamp.timestamp()),
            source: Some(self.source.clone()),
            name: Some(self.name.clone()),
        }
    }
}

/// A min/max/avg aggregate of one `(source, name)` series over a time window.
/// Stored under the hour- or day-summary kind depending on the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Start of the summarized period.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub period_start: DateTime<Utc>,
    pub source: String,
    pub name: String,

    /// Count of summarized samples. Only used while computing `avg_value`;
    /// not persisted.
    #[serde(skip)]
    pub num_values: u32,

    pub min_value: f32,
    pub max_value: f32,
    pub avg_value: f32,
}

impl Entity for Summary {
    /// This format cannot be changed.
    fn key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.period_start.timestamp(),
            self.source,
            self.name
        )
    }

    fn props(&self) -> Props {
        Props {
            timestamp: Some(self.period_start.timestamp()),
            source: Some(self.source.clone()),
            name: Some(self.name.clone()),
        }
    }
}

/// Singleton tracking how far summarization has progressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryState {
    /// Start of the last fully-summarized day.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_full_day: DateTime<Utc>,
}

impl Entity for SummaryState {
    fn key(&self) -> String {
        super::store::SINGLETON_ID.to_string()
    }

    fn props(&self) -> Props {
        Props::default()
    }
}

/// A condition's current state, as recorded during alert evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionState {
    /// Identity of the condition that produced this state.
    pub id: String,

    /// When the condition became active, or `None` if inactive.
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub active_since: Option<DateTime<Utc>>,

    /// Human-readable rendering of the condition and its sample's value.
    pub msg: String,
}

/// Singleton holding the currently-active conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertState {
    pub active: Vec<ConditionState>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_eval_time: DateTime<Utc>,
}

impl Default for AlertState {
    fn default() -> Self {
        Self {
            active: Vec::new(),
            last_eval_time: DateTime::UNIX_EPOCH,
        }
    }
}

impl Entity for AlertState {
    fn key(&self) -> String {
        super::store::SINGLETON_ID.to_string()
    }

    fn props(&self) -> Props {
        Props::default()
    }
}
