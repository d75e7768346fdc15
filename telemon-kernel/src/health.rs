/**
 * HEALTH KERNEL - Compteurs de santé du moteur de télémétrie
 *
 * RÔLE : Agrège l'uptime, l'activité de la boucle de maintenance, l'état du
 * cache et du store dans un `KernelHealth` sérialisable.
 *
 * PUBLICATION : log structuré périodique (`spawn_health_reporter`) et un
 * dernier rapport à l'arrêt.
 */

use crate::maintenance::TickReport;
use crate::service::{CacheStats, SharedTelemetry};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub ticks: u64,
    pub refresh_failures: u64,
    pub trim_failures: u64,
    pub rows_trimmed: u64,
    pub last_tick: Option<TickReport>,
    pub cache: CacheStats,
    pub store_backend: &'static str,
    pub store_status: String,
    pub memory_usage_mb: f32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    ticks: Arc<AtomicU64>,
    refresh_failures: Arc<AtomicU64>,
    trim_failures: Arc<AtomicU64>,
    rows_trimmed: Arc<AtomicU64>,
    last_tick: Arc<Mutex<Option<TickReport>>>,
    store_status: Arc<Mutex<String>>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            ticks: Arc::new(AtomicU64::new(0)),
            refresh_failures: Arc::new(AtomicU64::new(0)),
            trim_failures: Arc::new(AtomicU64::new(0)),
            rows_trimmed: Arc::new(AtomicU64::new(0)),
            last_tick: Arc::new(Mutex::new(None)),
            store_status: Arc::new(Mutex::new("unknown".to_string())),
        }
    }

    pub fn mark_store_ok(&self) {
        *self.store_status.lock() = "ok".to_string();
    }

    pub fn mark_store_error(&self, error: &str) {
        *self.store_status.lock() = format!("error: {error}");
    }

    /// Intègre le bilan d'un tick de maintenance
    pub fn record_tick(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.refresh_failures
            .fetch_add(report.refresh_failures as u64, Ordering::Relaxed);
        self.trim_failures.fetch_add(report.trim_failures as u64, Ordering::Relaxed);
        self.rows_trimmed.fetch_add(report.rows_trimmed, Ordering::Relaxed);
        if report.host_ids_error.is_some() {
            self.mark_store_error("host roster unavailable");
        } else {
            self.mark_store_ok();
        }
        *self.last_tick.lock() = Some(report.clone());
    }

    pub fn get_health(&self, telemetry: &SharedTelemetry) -> KernelHealth {
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            ticks: self.ticks.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            trim_failures: self.trim_failures.load(Ordering::Relaxed),
            rows_trimmed: self.rows_trimmed.load(Ordering::Relaxed),
            last_tick: self.last_tick.lock().clone(),
            cache: telemetry.cache_stats(),
            store_backend: telemetry.store_name(),
            store_status: self.store_status.lock().clone(),
            memory_usage_mb: get_memory_usage_mb(),
        }
    }

    /// Log périodique du health jusqu'au signal d'arrêt
    pub fn spawn_health_reporter(
        &self,
        telemetry: SharedTelemetry,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // le premier tick est immédiat
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let health = tracker.get_health(&telemetry);
                        match serde_json::to_string(&health) {
                            Ok(payload) => info!(
                                uptime = health.uptime_seconds,
                                ticks = health.ticks,
                                series_cached = health.cache.series_entries,
                                health = %payload,
                                "kernel health"
                            ),
                            Err(e) => warn!(error = %e, "failed to serialize kernel health"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RSS du process en Mo (0 hors Linux ou si /proc est illisible)
fn get_memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceSettings, TelemetryService};
    use crate::store::{MemoryStore, StoreKeys};

    fn telemetry() -> SharedTelemetry {
        TelemetryService::new(Arc::new(MemoryStore::new()), StoreKeys::default(), ServiceSettings::default())
            .into_shared()
    }

    #[test]
    fn test_record_tick_accumulates() {
        let tracker = HealthTracker::new();
        let report = TickReport {
            hosts: 3,
            refresh_failures: 2,
            trim_failures: 1,
            rows_trimmed: 40,
            ..TickReport::default()
        };
        tracker.record_tick(&report);
        tracker.record_tick(&report);

        let health = tracker.get_health(&telemetry());
        assert_eq!(health.ticks, 2);
        assert_eq!(health.refresh_failures, 4);
        assert_eq!(health.trim_failures, 2);
        assert_eq!(health.rows_trimmed, 80);
        assert_eq!(health.last_tick.map(|t| t.hosts), Some(3));
        assert_eq!(health.store_status, "ok");
        assert_eq!(health.store_backend, "memory");
    }

    #[test]
    fn test_roster_failure_marks_store() {
        let tracker = HealthTracker::new();
        tracker.record_tick(&TickReport {
            host_ids_error: Some("timed out".into()),
            ..TickReport::default()
        });
        assert!(tracker.get_health(&telemetry()).store_status.starts_with("error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reporter_stops_on_shutdown() {
        let tracker = HealthTracker::new();
        let (tx, rx) = watch::channel(false);
        let handle = tracker.spawn_health_reporter(telemetry(), Duration::from_secs(30), rx);
        tokio::time::advance(Duration::from_secs(65)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
