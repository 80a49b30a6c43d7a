//! homestat - a small home-telemetry platform.
//!
//! Two cooperating processes share this library: a local collector daemon
//! (`homestat-collector`) that queues and forwards sensor samples, and a
//! server (`homestat-server`) that persists them in a SQLite-backed entity
//! store, rolls them up into hourly and daily summaries, evaluates alert
//! conditions, and serves chart-ready query results.

pub mod collector;
pub mod config;
pub mod db;
pub mod engine;
pub mod sample;
pub mod web;
