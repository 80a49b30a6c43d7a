//! The homestat server: persists reported samples, summarizes and purges
//! them on external triggers, evaluates alert conditions, and serves
//! chart-ready queries.

use std::env;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homestat::config::{Config, DEV_SECRET};
use homestat::db::Datastore;
use homestat::engine::alert::LogNotifier;
use homestat::web::{AppState, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("homestat=info".parse()?),
        )
        .init();

    let config_path = env::var("HOMESTAT_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let (mut cfg, tz) = Config::load(&config_path)?;

    let dev_mode = env::var("HOMESTAT_DEV").is_ok_and(|v| v == "1");
    if dev_mode {
        tracing::info!("dev mode: signature checks use the hardcoded secret");
        cfg.report_secret = DEV_SECRET.to_string();
    }

    let db_path = env::var("HOMESTAT_DB").unwrap_or_else(|_| "homestat.db".to_string());
    let store = Arc::new(Datastore::open(&db_path)?);
    tracing::info!("using database at {db_path}, time zone {tz}");

    let addr = env::var("HOMESTAT_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let state = AppState {
        store,
        cfg: Arc::new(cfg),
        tz,
        dev_mode,
        notifier: Arc::new(LogNotifier),
    };
    Server::new(state, &addr).start().await
}
