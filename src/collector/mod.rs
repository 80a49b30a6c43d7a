//! Collector daemon internals: the local report listener, the persistent
//! forwarding pipeline, and the ping/power probes.

mod config;
mod listener;
mod ping;
mod power;
mod reporter;

pub use config::*;
pub use listener::*;
pub use ping::*;
pub use power::*;
pub use reporter::*;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Collector error types.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The current time at the second precision samples carry.
pub(crate) fn now_seconds() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now)
}
