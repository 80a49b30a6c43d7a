//! HTTP surface of the server: report ingestion, chart queries, and the
//! housekeeping endpoints an external scheduler hits.

mod handlers;

pub use handlers::*;

use axum::routing::{get, post};
use axum::Router;
use chrono_tz::Tz;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db::Datastore;
use crate::engine::alert::Notifier;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Datastore>,
    pub cfg: Arc<Config>,
    pub tz: Tz,
    /// Skips report-signature checks and is only ever set from the
    /// environment, never from config.
    pub dev_mode: bool,
    pub notifier: Arc<dyn Notifier>,
}

/// Web server for homestat.
pub struct Server {
    state: AppState,
    addr: String,
}

impl Server {
    pub fn new(state: AppState, addr: &str) -> Self {
        Self {
            state,
            addr: addr.to_string(),
        }
    }

    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/report", post(handlers::handle_report))
            .route("/query", get(handlers::handle_query))
            .route("/summarize", get(handlers::handle_summarize))
            .route("/purge", get(handlers::handle_purge))
            .route("/eval", get(handlers::handle_eval))
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// Starts the server on the configured address.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let router = self.routes();
        tracing::info!("web server listening on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, router).await?;
        Ok(())
    }
}
