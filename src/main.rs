use std::sync::Arc;

use tracing::info;

use slotkeep::config::Config;
use slotkeep::engine::Engine;
use slotkeep::maintenance;
use slotkeep::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    slotkeep::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let hub = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::open(config.wal_path(), config.policy.clone(), hub).await?);

    let summary = engine.summary().await;
    info!("slotkeep started");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  state: {} users, {} workspaces, {} services, {} appointments ({} active)",
        summary.users, summary.workspaces, summary.services, summary.appointments, summary.active
    );
    info!("  utc_offset: {}", config.policy.utc_offset);
    info!("  role_check_includes_admin: {}", config.policy.role_check_includes_admin);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let compactor = tokio::spawn(maintenance::run_compactor(
        engine.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    // Graceful shutdown on SIGTERM/ctrl-c
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }

    info!("shutdown signal received");
    compactor.abort();
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("slotkeep stopped");
    Ok(())
}
