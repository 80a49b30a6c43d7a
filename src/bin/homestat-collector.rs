//! The homestat collector daemon: accepts samples from local sensors,
//! generates its own via the ping and power probes, and forwards everything
//! to the server through the persistent reporter.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homestat::collector::{run_listener, run_ping_loop, run_power_loop, CollectorConfig, Reporter};

fn default_config_path() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".homestat-collector.json")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("homestat=info".parse()?),
        )
        .init();

    let cfg = match env::args().nth(1) {
        Some(path) => CollectorConfig::load(path)?,
        None => {
            let path = default_config_path();
            if path.exists() {
                CollectorConfig::load(path)?
            } else {
                CollectorConfig::default()
            }
        }
    };
    let cfg = Arc::new(cfg);

    let reporter = Arc::new(Reporter::new(&cfg)?);
    reporter.clone().start();

    if !cfg.ping_host.is_empty() {
        let (cfg, reporter) = (cfg.clone(), reporter.clone());
        std::thread::spawn(move || run_ping_loop(cfg, reporter));
    }
    if !cfg.power_command.is_empty() {
        let (cfg, reporter) = (cfg.clone(), reporter.clone());
        std::thread::spawn(move || run_power_loop(cfg, reporter));
    }

    run_listener(&cfg, reporter).await
}
