//! HTTP request handlers.

use super::AppState;
use crate::engine::alert::evaluate_conds;
use crate::engine::query::{do_query, Granularity, QueryParams};
use crate::engine::summarize::{add_days, delete_summarized_samples, generate_summaries, start_of_day};
use crate::engine::write::write_samples;
use crate::sample::{report_signature, Sample};

use axum::extract::{Form, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::{Duration, TimeZone, Utc};
use serde::Deserialize;

/// Body of a collector report: `d` holds newline-separated samples, `s` the
/// signature over them.
#[derive(Debug, Deserialize)]
pub struct ReportForm {
    pub d: String,
    #[serde(default)]
    pub s: String,
}

pub async fn handle_report(State(state): State<AppState>, Form(form): Form<ReportForm>) -> Response {
    if !state.dev_mode {
        let expected = report_signature(&form.d, &state.cfg.report_secret);
        if form.s != expected {
            tracing::warn!("report has bad signature {:?}", form.s);
            return (StatusCode::BAD_REQUEST, "Bad signature").into_response();
        }
    }

    let now = Utc::now();
    let mut samples = Vec::new();
    for line in form.d.split('\n') {
        match Sample::parse(line, now) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                tracing::warn!("report has unparseable sample: {e}");
                return (StatusCode::BAD_REQUEST, "Bad sample").into_response();
            }
        }
    }

    tracing::debug!("got report with {} sample(s)", samples.len());
    match write_samples(&state.store, &samples) {
        Ok(()) => "got it\n".into_response(),
        Err(e) => {
            tracing::error!("failed to write {} sample(s): {e}", samples.len());
            (StatusCode::INTERNAL_SERVER_ERROR, "Write failed").into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryArgs {
    /// Comma-separated column labels, parallel to `names`.
    pub labels: String,
    /// Comma-separated `source|name` pairs.
    pub names: String,
    pub start: i64,
    pub end: i64,
    /// The series' reporting interval in seconds; when present, the planner
    /// picks granularity and aggregation.
    #[serde(default)]
    pub interval: Option<i64>,
}

pub async fn handle_query(State(state): State<AppState>, Query(args): Query<QueryArgs>) -> Response {
    let labels: Vec<String> = args.labels.split(',').map(str::to_string).collect();
    let names: Vec<String> = args.names.split(',').map(str::to_string).collect();
    if labels.len() != names.len() {
        return (StatusCode::BAD_REQUEST, "Bad request").into_response();
    }

    let (Some(start), Some(end)) = (
        state.tz.timestamp_opt(args.start, 0).single(),
        state.tz.timestamp_opt(args.end, 0).single(),
    ) else {
        return (StatusCode::BAD_REQUEST, "Bad time").into_response();
    };

    let mut params = QueryParams {
        labels,
        source_names: names,
        start,
        end,
        granularity: Granularity::Individual,
        aggregation: 1,
    };
    if let Some(interval) = args.interval {
        if interval <= 0 {
            return (StatusCode::BAD_REQUEST, "Bad interval").into_response();
        }
        // Pessimistic estimate of the earliest surviving raw sample; it
        // assumes purging has fully caught up with the retention window.
        let earliest = add_days(
            start_of_day(Utc::now().with_timezone(&state.tz)),
            -state.cfg.days_to_keep,
        );
        params.update_granularity_and_aggregation(Duration::seconds(interval), Some(earliest));
    }

    // Buffer the whole table so a mid-stream fetch error can't truncate the
    // response.
    let mut buf = Vec::new();
    match do_query(&state.store, &mut buf, &params).await {
        Ok(()) => ([(header::CONTENT_TYPE, "application/json")], buf).into_response(),
        Err(e) => {
            tracing::error!("query failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Query failed").into_response()
        }
    }
}

pub async fn handle_summarize(State(state): State<AppState>) -> Response {
    let now = Utc::now().with_timezone(&state.tz);
    let delay = Duration::seconds(state.cfg.full_day_delay_seconds);
    match generate_summaries(&state.store, now, delay) {
        Ok(()) => "summarizing done\n".into_response(),
        Err(e) => {
            tracing::error!("generating summaries failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Generating summaries failed").into_response()
        }
    }
}

pub async fn handle_purge(State(state): State<AppState>) -> Response {
    match delete_summarized_samples(&state.store, state.tz, state.cfg.days_to_keep) {
        Ok(()) => "purging done\n".into_response(),
        Err(e) => {
            tracing::error!("purging samples failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Purging samples failed").into_response()
        }
    }
}

pub async fn handle_eval(State(state): State<AppState>) -> Response {
    let result = evaluate_conds(
        &state.store,
        &state.cfg.alert_conditions,
        Utc::now(),
        &state.cfg.alert_sender,
        &state.cfg.alert_recipients,
        state.notifier.as_ref(),
    )
    .await;
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => {
            tracing::error!("evaluating alert conditions failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Evaluating alert conditions failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{Datastore, Field, SAMPLE_KIND};
    use crate::engine::alert::LogNotifier;
    use std::sync::Arc;

    fn test_state(dev_mode: bool) -> AppState {
        let cfg = Config {
            report_secret: "this is the secret".to_string(),
            days_to_keep: 3,
            full_day_delay_seconds: 24 * 3600,
            ..Config::default()
        };
        AppState {
            store: Arc::new(Datastore::open_in_memory().unwrap()),
            cfg: Arc::new(cfg),
            tz: chrono_tz::UTC,
            dev_mode,
            notifier: Arc::new(LogNotifier),
        }
    }

    fn stored_samples(state: &AppState) -> Vec<Sample> {
        state
            .store
            .query(SAMPLE_KIND)
            .order(Field::Timestamp)
            .get_all()
            .unwrap()
    }

    #[tokio::test]
    async fn test_handle_report_rejects_bad_signature() {
        let state = test_state(false);
        let form = ReportForm {
            d: "123|s|n|1.0".to_string(),
            s: "bogus".to_string(),
        };
        let resp = handle_report(State(state.clone()), Form(form)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(stored_samples(&state).is_empty());
    }

    #[tokio::test]
    async fn test_handle_report_writes_signed_samples() {
        let state = test_state(false);
        let d = "123|s|n|1.0\n456|s|n|2.0".to_string();
        let s = report_signature(&d, &state.cfg.report_secret);
        let resp = handle_report(State(state.clone()), Form(ReportForm { d, s })).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let stored = stored_samples(&state);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].timestamp.timestamp(), 123);
        assert_eq!(stored[1].value, 2.0);
    }

    #[tokio::test]
    async fn test_handle_report_rejects_bad_sample_line() {
        let state = test_state(false);
        let d = "123|s|n|1.0\nnot-a-sample".to_string();
        let s = report_signature(&d, &state.cfg.report_secret);
        let resp = handle_report(State(state.clone()), Form(ReportForm { d, s })).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(stored_samples(&state).is_empty());
    }

    #[tokio::test]
    async fn test_handle_report_dev_mode_skips_signature() {
        let state = test_state(true);
        let form = ReportForm {
            d: "123|s|n|1.0".to_string(),
            s: String::new(),
        };
        let resp = handle_report(State(state.clone()), Form(form)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(stored_samples(&state).len(), 1);
    }

    #[tokio::test]
    async fn test_handle_query_mismatched_labels() {
        let state = test_state(true);
        let args = QueryArgs {
            labels: "A,B".to_string(),
            names: "a|b".to_string(),
            start: 0,
            end: 10,
            interval: None,
        };
        let resp = handle_query(State(state), Query(args)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_handle_query_returns_table() {
        let state = test_state(true);
        write_samples(
            &state.store,
            &[
                Sample::new(chrono::DateTime::from_timestamp(2, 0).unwrap(), "a", "b", 0.5),
                Sample::new(chrono::DateTime::from_timestamp(3, 0).unwrap(), "a", "b", 1.0),
            ],
        )
        .unwrap();

        let args = QueryArgs {
            labels: "B".to_string(),
            names: "a|b".to_string(),
            start: 0,
            end: 10,
            interval: None,
        };
        let resp = handle_query(State(state), Query(args)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let table: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(table["rows"].as_array().unwrap().len(), 2);
        assert_eq!(table["cols"][1]["label"], "B");
    }
}
