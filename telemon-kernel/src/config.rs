/**
 * CONFIGURATION KERNEL - Défauts, fichier YAML puis variables d'environnement
 *
 * ORDRE DE RÉSOLUTION :
 * 1. `KernelConfig::default()`
 * 2. Fichier YAML `$TELEMON_KERNEL_CONFIG` (défaut `kernel.yaml`), optionnel
 * 3. Variables d'environnement (après chargement du `.env` par main)
 *
 * Une valeur d'environnement illisible est ignorée avec un warning,
 * la valeur précédente est conservée.
 */

use crate::error::{KernelError, KernelResult};
use crate::store::StoreKeys;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreBackend::File),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(KernelError::Config(format!("unknown store backend '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// TTL du cache local (LOCAL_CACHE_TIME)
    pub cache_ttl_secs: u64,
    /// Au-delà, un host est offline (OFFLINE_THRESHOLD)
    pub offline_threshold_secs: u64,
    /// Horizon de rétention des échantillons (DATA_RETENTION_DAYS)
    pub retention_days: u64,
    /// Période de la boucle de maintenance (MAINTENANCE_INTERVAL)
    pub maintenance_interval_secs: u64,
    /// Deadline de chaque appel au store (STORE_TIMEOUT)
    pub store_timeout_secs: u64,
    /// Préfixe de toutes les clés (KEY_PREFIX)
    pub key_prefix: String,
    pub store: StoreBackend,
    pub data_file: PathBuf,
    /// Période du log de santé (HEALTH_REPORT_INTERVAL)
    pub health_report_interval_secs: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            offline_threshold_secs: 600,
            retention_days: 7,
            maintenance_interval_secs: 60,
            store_timeout_secs: 10,
            key_prefix: "system_monitor:".into(),
            store: StoreBackend::File,
            data_file: PathBuf::from("./data/store.json"),
            health_report_interval_secs: 300,
        }
    }
}

/// Remplace `target` si la variable existe et se parse
fn override_from<T, F>(lookup: &F, key: &str, target: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(v) => *target = v,
        Err(_) => warn!(key, value = %raw, "ignoring unparsable environment value"),
    }
}

impl KernelConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    pub fn health_report_interval(&self) -> Duration {
        Duration::from_secs(self.health_report_interval_secs)
    }

    pub fn retention_secs(&self) -> i64 {
        (self.retention_days as i64).saturating_mul(86_400)
    }

    pub fn keys(&self) -> StoreKeys {
        StoreKeys::new(self.key_prefix.clone())
    }

    /// Applique les surcharges fournies par `lookup` (l'environnement en prod)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "LOCAL_CACHE_TIME", &mut self.cache_ttl_secs);
        override_from(&lookup, "OFFLINE_THRESHOLD", &mut self.offline_threshold_secs);
        override_from(&lookup, "DATA_RETENTION_DAYS", &mut self.retention_days);
        override_from(&lookup, "MAINTENANCE_INTERVAL", &mut self.maintenance_interval_secs);
        override_from(&lookup, "STORE_TIMEOUT", &mut self.store_timeout_secs);
        override_from(&lookup, "HEALTH_REPORT_INTERVAL", &mut self.health_report_interval_secs);
        override_from(&lookup, "TELEMON_DATA_FILE", &mut self.data_file);
        if let Some(prefix) = lookup("KEY_PREFIX") {
            self.key_prefix = prefix;
        }
        if let Some(raw) = lookup("TELEMON_STORE") {
            match raw.parse() {
                Ok(backend) => self.store = backend,
                Err(e) => warn!(value = %raw, error = %e, "ignoring TELEMON_STORE"),
            }
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Refuse les valeurs qui rendraient le cache ou la boucle inutilisables
    pub fn validate(&self) -> KernelResult<()> {
        if self.cache_ttl_secs == 0 {
            return Err(KernelError::Config("cache TTL must be > 0".into()));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(KernelError::Config("maintenance interval must be > 0".into()));
        }
        if self.store_timeout_secs == 0 {
            return Err(KernelError::Config("store timeout must be > 0".into()));
        }
        if self.health_report_interval_secs == 0 {
            return Err(KernelError::Config("health report interval must be > 0".into()));
        }
        Ok(())
    }

    /// Lit un fichier YAML ; absent ou vide = défauts, invalide = défauts + warning
    pub async fn from_file(path: &Path) -> Self {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Self::default();
        }
        let txt = fs::read_to_string(path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return Self::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
            Self::default()
        })
    }
}

/// Configuration complète : fichier puis environnement
pub async fn load_config() -> KernelResult<KernelConfig> {
    let path = std::env::var("TELEMON_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    let mut config = KernelConfig::from_file(Path::new(&path)).await;
    config.apply_env();
    config.validate()?;
    Ok(config)
}
