//! Local report listener.
//!
//! Sensors on the home network POST unsigned sample lines here; the
//! listener parses them (stamping lines that omit a timestamp with the
//! receive time) and hands them to the reporter for delivery.

use axum::extract::{Form, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;

use super::{now_seconds, CollectorConfig, Reporter};
use crate::sample::Sample;

#[derive(Clone)]
struct ListenerState {
    reporter: Arc<Reporter>,
}

#[derive(Debug, Deserialize)]
struct LocalReport {
    d: String,
}

async fn handle_report(State(state): State<ListenerState>, Form(body): Form<LocalReport>) -> Response {
    let now = now_seconds();
    let mut samples = Vec::new();
    for line in body.d.split('\n') {
        match Sample::parse(line, now) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                tracing::warn!("report has unparseable sample: {e}");
                return (StatusCode::BAD_REQUEST, "Bad request").into_response();
            }
        }
    }

    state.reporter.report_samples(samples);
    "LGTM".into_response()
}

/// Serves the local report endpoint until the process exits.
pub async fn run_listener(
    cfg: &CollectorConfig,
    reporter: Arc<Reporter>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = Router::new()
        .route("/report", post(handle_report))
        .with_state(ListenerState { reporter });

    // Bare ":port" means every interface.
    let addr = match cfg.listen_address.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => cfg.listen_address.clone(),
    };
    tracing::info!("listening at {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
