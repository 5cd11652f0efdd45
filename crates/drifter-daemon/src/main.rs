use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use drifter_core::config::DrifterConfig;
use drifter_daemon::daemon::Daemon;
use drifter_daemon::orchestrator::Orchestrator;
use drifter_daemon::provider::FixtureProvider;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    drifter_telemetry::logging::init_logging("drifter-daemon", "info");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("drifter.toml"));
    let config = DrifterConfig::load_or_default(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    if config.node_seeds.is_empty() {
        warn!("no [[nodes]] fixtures configured; the registry will stay empty");
    }

    let provider = Arc::new(FixtureProvider::from_seeds(&config.node_seeds));
    let orchestrator = Arc::new(Orchestrator::new(provider, config.orchestrator.clone()));
    let daemon = Daemon::new(
        orchestrator,
        Duration::from_secs(config.daemon.cycle_interval_secs),
    );

    daemon.start().await;
    info!(
        cycle_secs = config.daemon.cycle_interval_secs,
        nodes = config.node_seeds.len(),
        "drifter daemon running; ctrl-c to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    daemon.stop().await;

    Ok(())
}
