use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use procurement_intake::api::start_server;
use procurement_intake::config::{self, ConfigHandle};
use procurement_intake::core_state::{start_draft_sweeper, CoreState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("Procurement intake starting v{}", config::APP_VERSION);

    if let Err(e) = run().await {
        tracing::error!("Startup failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config_path = config::config_path();
    let handle = ConfigHandle::load(config_path.clone()).map_err(|e| e.to_string())?;
    match &config_path {
        Some(path) => tracing::info!(path = %path.display(), "Configuration loaded"),
        None => tracing::info!("No config file; using built-in defaults"),
    }

    let data_dir = config::app_data_dir();
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| format!("Cannot create data directory {}: {e}", data_dir.display()))?;

    let runtime = handle.current();
    let bind = runtime.config.server.bind.clone();
    let sweep_interval = runtime.config.server.sweep_interval();

    let core = Arc::new(CoreState::new(handle, config::database_path()));
    core.open_db().map_err(|e| e.to_string())?;
    tracing::info!(path = %core.db_path().display(), "Database ready");

    let _sweeper = start_draft_sweeper(core.clone(), sweep_interval);
    let mut server = start_server(core, &bind).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for shutdown signal: {e}");
    }
    server.shutdown();
    server.wait().await;
    Ok(())
}
