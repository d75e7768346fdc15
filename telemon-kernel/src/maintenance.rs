/**
 * BOUCLE DE MAINTENANCE - Rafraîchissement proactif et rétention
 *
 * RÔLE : Garde le cache chaud et le store borné, sans intervention des appelants.
 *
 * FONCTIONNEMENT (à chaque tick, période `MAINTENANCE_INTERVAL`) :
 * 1. purge physique des entrées expirées du cache
 * 2. refresh forcé du roster des host ids
 * 3. une tâche par action, toutes concurrentes :
 *    - noms d'affichage (une fois par tick)
 *    - par host : info, série temporelle, trim de rétention
 * Chaque tick tourne dans sa propre tâche : un tick lent ne retarde pas le
 * suivant. À l'arrêt, les ticks en cours sont abandonnés d'un bloc.
 */

use crate::error::{KernelError, KernelResult};
use crate::health::HealthTracker;
use crate::service::{unix_now, SharedTelemetry};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Bilan d'un tick
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub started_at: i64,
    pub hosts: usize,
    pub series_refreshed: usize,
    pub info_refreshed: usize,
    pub refresh_failures: usize,
    pub trim_failures: usize,
    pub rows_trimmed: u64,
    pub cache_purged: usize,
    pub host_ids_error: Option<String>,
    pub duration_ms: u64,
}

enum Action {
    Names(KernelResult<()>),
    Info(String, KernelResult<()>),
    Series(String, KernelResult<()>),
    Trim(String, KernelResult<u64>),
}

#[derive(Clone)]
pub struct MaintenanceLoop {
    telemetry: SharedTelemetry,
    health: HealthTracker,
    period: Duration,
}

impl MaintenanceLoop {
    pub fn new(telemetry: SharedTelemetry, health: HealthTracker, period: Duration) -> Self {
        Self { telemetry, health, period }
    }

    /// Un passage complet de maintenance, enregistré dans le health tracker
    pub async fn run_tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport {
            started_at: unix_now(),
            cache_purged: self.telemetry.purge_expired(),
            ..TickReport::default()
        };

        let host_ids = match self.telemetry.get_host_ids(true).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "maintenance: host roster refresh failed");
                report.host_ids_error = Some(e.to_string());
                report.duration_ms = started.elapsed().as_millis() as u64;
                self.health.record_tick(&report);
                return report;
            }
        };
        report.hosts = host_ids.len();

        let mut actions = JoinSet::new();
        let telemetry = self.telemetry.clone();
        actions.spawn(async move {
            Action::Names(telemetry.get_display_names(true).await.map(|_| ()))
        });
        for host_id in host_ids {
            let telemetry = self.telemetry.clone();
            let id = host_id.clone();
            actions.spawn(async move {
                Action::Info(id.clone(), telemetry.get_host_info(&id, true).await.map(|_| ()))
            });
            let telemetry = self.telemetry.clone();
            let id = host_id.clone();
            actions.spawn(async move {
                Action::Series(id.clone(), telemetry.get_series(&id, true, None).await.map(|_| ()))
            });
            let telemetry = self.telemetry.clone();
            actions.spawn(async move {
                let res = telemetry.trim_retention(&host_id).await;
                Action::Trim(host_id, res)
            });
        }

        while let Some(joined) = actions.join_next().await {
            match joined {
                Ok(action) => self.account(action, &mut report),
                Err(e) => {
                    warn!(error = %e, "maintenance action aborted");
                    report.refresh_failures += 1;
                }
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.health.record_tick(&report);
        info!(
            hosts = report.hosts,
            series = report.series_refreshed,
            failures = report.refresh_failures + report.trim_failures,
            trimmed = report.rows_trimmed,
            purged = report.cache_purged,
            ms = report.duration_ms,
            "maintenance tick done"
        );
        report
    }

    fn account(&self, action: Action, report: &mut TickReport) {
        match action {
            Action::Names(Ok(())) => {}
            Action::Names(Err(e)) => {
                warn!(error = %e, "maintenance: display names refresh failed");
                report.refresh_failures += 1;
            }
            Action::Info(_, Ok(())) => report.info_refreshed += 1,
            Action::Series(_, Ok(())) => report.series_refreshed += 1,
            // host sans données : rien à rafraîchir
            Action::Info(host_id, Err(KernelError::NotFound(_)))
            | Action::Series(host_id, Err(KernelError::NotFound(_))) => {
                debug!(host_id = %host_id, "maintenance: nothing stored for host");
            }
            Action::Info(host_id, Err(e)) | Action::Series(host_id, Err(e)) => {
                warn!(host_id = %host_id, error = %e, "maintenance: refresh failed");
                report.refresh_failures += 1;
            }
            Action::Trim(_, Ok(removed)) => report.rows_trimmed += removed,
            Action::Trim(host_id, Err(e)) => {
                warn!(host_id = %host_id, error = %e, "maintenance: retention trim failed");
                report.trim_failures += 1;
            }
        }
    }

    /// Lance la boucle ; elle s'arrête quand `shutdown` passe à `true`
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: JoinSet<TickReport> = JoinSet::new();
            info!(period_secs = self.period.as_secs(), "maintenance loop started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let this = self.clone();
                        ticks.spawn(async move { this.run_tick().await });
                    }
                    Some(done) = ticks.join_next(), if !ticks.is_empty() => {
                        if let Err(e) = done {
                            warn!(error = %e, "maintenance tick task failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            let in_flight = ticks.len();
            ticks.shutdown().await;
            info!(in_flight, "maintenance loop stopped");
        })
    }
}
