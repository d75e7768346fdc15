/**
 * TELEMON KERNEL - Point d'entrée du moteur de télémétrie
 *
 * RÔLE : Bootstrap : config, store, service de cache, boucle de maintenance
 * et reporter de santé, puis attente de Ctrl-C pour un arrêt propre.
 *
 * ARRÊT : signal -> la boucle abandonne les ticks en cours -> le service
 * est fermé -> dernier rapport de santé.
 */

use anyhow::{Context, Result};
use std::sync::Arc;
use telemon_kernel::{
    load_config, BackingStore, FileStore, HealthTracker, MaintenanceLoop, MemoryStore,
    StoreBackend, TelemetryService,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("telemon_kernel=info")),
        )
        .init();

    let cfg = load_config().await.context("failed to load kernel configuration")?;
    info!(
        ttl = cfg.cache_ttl_secs,
        offline_threshold = cfg.offline_threshold_secs,
        retention_days = cfg.retention_days,
        interval = cfg.maintenance_interval_secs,
        prefix = %cfg.key_prefix,
        "telemon kernel starting"
    );

    let store: Arc<dyn BackingStore> = match cfg.store {
        StoreBackend::File => Arc::new(
            FileStore::open(&cfg.data_file)
                .await
                .with_context(|| format!("failed to open store file {}", cfg.data_file.display()))?,
        ),
        StoreBackend::Memory => {
            warn!("using volatile in-memory store, data is lost at exit");
            Arc::new(MemoryStore::new())
        }
    };

    let telemetry = TelemetryService::from_config(store, &cfg).into_shared();
    let health = HealthTracker::new();

    telemetry.ping_store().await.context("backing store health check failed")?;
    health.mark_store_ok();
    info!(backend = telemetry.store_name(), "backing store reachable");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let maintenance = MaintenanceLoop::new(telemetry.clone(), health.clone(), cfg.maintenance_interval())
        .spawn(shutdown_rx.clone());
    let reporter = health.spawn_health_reporter(telemetry.clone(), cfg.health_report_interval(), shutdown_rx);

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    if shutdown_tx.send(true).is_err() {
        warn!("background tasks already stopped");
    }
    if let Err(e) = maintenance.await {
        error!(error = %e, "maintenance loop ended abnormally");
    }
    if let Err(e) = reporter.await {
        error!(error = %e, "health reporter ended abnormally");
    }

    telemetry.shutdown();
    let final_health = health.get_health(&telemetry);
    info!(
        uptime = final_health.uptime_seconds,
        ticks = final_health.ticks,
        rows_trimmed = final_health.rows_trimmed,
        "telemon kernel stopped"
    );
    Ok(())
}
