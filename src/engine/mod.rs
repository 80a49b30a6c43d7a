//! Server-side storage engine: sample ingestion, summarization, retention,
//! chart queries, and alert evaluation. External triggers (the HTTP layer)
//! drive every operation; the engine spawns no schedulers of its own.

pub mod alert;
pub mod query;
pub mod summarize;
pub mod write;

use thiserror::Error;

use crate::db::DbError;

/// Engine error types.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("write failed: {0}")]
    WriteFailed(#[source] DbError),
    #[error("store error: {0}")]
    Store(#[from] DbError),
    #[error("invalid 'source|name' string {0:?}")]
    BadSourceName(String),
    #[error("got {labels} label(s) for {names} series")]
    MismatchedSeries { labels: usize, names: usize },
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
    #[error("fetch task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("notify failed: {0}")]
    Notify(String),
}
