/*!
Test Harness pour le kernel de télémétrie

Facilite l'écriture de tests de bout en bout avec :
- un `StubStore` instrumenté derrière un vrai `TelemetryService`
- des helpers pour semer échantillons, info et noms d'affichage
- un health tracker et une boucle de maintenance prêts à l'emploi
*/

use crate::snapshot_builder::SnapshotBuilder;
use crate::store_stub::{StoreOp, StubStore};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use telemon_kernel::roster::UPDATE_TIME_FIELD;
use telemon_kernel::service::{ServiceSettings, TelemetryService};
use telemon_kernel::store::{BackingStore, StoreKeys};
use telemon_kernel::{HealthTracker, MaintenanceLoop, SharedTelemetry, TickReport};
use tracing_subscriber::EnvFilter;

pub struct TestHarness {
    pub store: StubStore,
    pub telemetry: SharedTelemetry,
    pub health: HealthTracker,
    keys: StoreKeys,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_settings(ServiceSettings::default())
    }

    pub fn with_settings(settings: ServiceSettings) -> Self {
        // événements tracing du kernel + records `log` du devkit, dans la sortie des tests
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
            .with_test_writer()
            .try_init()
            .ok();

        let store = StubStore::new();
        let keys = StoreKeys::default();
        let telemetry = TelemetryService::new(Arc::new(store.clone()), keys.clone(), settings).into_shared();
        Self { store, telemetry, health: HealthTracker::new(), keys }
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    /// Écrit un échantillon brut directement dans le store (pas de cache touché)
    pub async fn seed_sample(&self, host_id: &str, ts: i64, snapshot: &Value) -> Result<()> {
        let member = serde_json::to_vec(snapshot)?;
        self.store
            .backend()
            .add_scored(&self.keys.collection(host_id), member, ts as f64)
            .await
            .context("seed sample")?;
        self.store
            .backend()
            .hash_set(&self.keys.hashes(), HashMap::from([(host_id.to_string(), ts.to_string())]))
            .await?;
        Ok(())
    }

    pub async fn seed_built(&self, host_id: &str, ts: i64, builder: &SnapshotBuilder) -> Result<()> {
        self.seed_sample(host_id, ts, &builder.build()).await
    }

    /// Membre illisible, pour tester la tolérance du décodage
    pub async fn seed_garbage(&self, host_id: &str, ts: i64, raw: &[u8]) -> Result<()> {
        self.store
            .backend()
            .add_scored(&self.keys.collection(host_id), raw.to_vec(), ts as f64)
            .await?;
        Ok(())
    }

    pub async fn seed_info(&self, host_id: &str, update_time: i64, extra: &[(&str, &str)]) -> Result<()> {
        let mut fields: HashMap<String, String> =
            extra.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        fields.insert(UPDATE_TIME_FIELD.to_string(), update_time.to_string());
        self.store.backend().hash_set(&self.keys.info(host_id), fields).await?;
        Ok(())
    }

    pub async fn seed_name(&self, host_id: &str, name: &str) -> Result<()> {
        self.store
            .backend()
            .hash_set(&self.keys.names(), HashMap::from([(host_id.to_string(), name.to_string())]))
            .await?;
        Ok(())
    }

    /// Nombre de lectures de la série d'un host depuis le store
    pub fn series_reads(&self, host_id: &str) -> usize {
        self.store.count(StoreOp::RangeByScore, &self.keys.collection(host_id))
    }

    pub fn info_reads(&self, host_id: &str) -> usize {
        self.store.count(StoreOp::HashGetAll, &self.keys.info(host_id))
    }

    /// Scores restant dans le sorted set d'un host
    pub fn stored_timestamps(&self, host_id: &str) -> Vec<i64> {
        self.store
            .dump()
            .zsets
            .get(&self.keys.collection(host_id))
            .map(|z| z.iter().map(|m| m.score as i64).collect())
            .unwrap_or_default()
    }

    pub fn maintenance(&self, period: Duration) -> MaintenanceLoop {
        MaintenanceLoop::new(self.telemetry.clone(), self.health.clone(), period)
    }

    pub async fn run_tick(&self) -> TickReport {
        self.maintenance(Duration::from_secs(60)).run_tick().await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_harness_seeds_visible_data() {
        let harness = TestHarness::new();
        harness.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();
        harness.seed_info("h1", 100, &[("platform", "linux")]).await.unwrap();

        assert_eq!(harness.telemetry.get_host_ids(false).await.unwrap(), vec!["h1"]);
        assert_eq!(harness.telemetry.get_series("h1", false, None).await.unwrap().len(), 1);
        assert_eq!(harness.series_reads("h1"), 1);
        assert_eq!(
            harness.telemetry.get_host_info("h1", false).await.unwrap().get("platform").map(String::as_str),
            Some("linux")
        );
        assert_eq!(harness.stored_timestamps("h1"), vec![100]);
    }

    #[test]
    fn test_harness_installs_tracing_subscriber() {
        let _harness = TestHarness::new();
        assert!(tracing::dispatcher::has_been_set());
    }
}
