/**
 * TELEMETRY SERVICE - Cache de lecture devant le backing store
 *
 * RÔLE :
 * Valeur unique construite au démarrage, partagée par `Arc` entre la boucle
 * de maintenance et les appelants. Détient les deux namespaces du cache TTL :
 * - `series`     : host id -> série temporelle complète (range `[0, now]`)
 * - `attributes` : clé du store -> map texte (info d'un host, noms, roster)
 *
 * FONCTIONNEMENT :
 * - Lecture : cache d'abord ; sur miss ou `refresh`, pull du store puis set
 * - Un pull en échec n'est jamais mis en cache : l'entrée précédente reste
 * - Chaque appel au store passe par un timeout (`store_timeout`)
 * - Après `shutdown()`, toute opération renvoie `CacheUnavailable`
 *
 * CYCLE DE VIE : `open` est un verrou, pas un simple flag. Un set dans le
 * cache se fait sous verrou partagé après revérification, `shutdown` prend
 * le verrou exclusif : une lecture en vol ne peut pas repeupler un cache vidé.
 */

use crate::aggregate::{format_series, ChartPayload};
use crate::cache::TtlCache;
use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::roster::{classify, RosterPayload, UPDATE_TIME_FIELD};
use crate::series::TimeSeries;
use crate::snapshot::{decode_snapshot, MetricGroup, Snapshot};
use crate::store::{BackingStore, ScoreBound, StoreError, StoreKeys};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub type SharedTelemetry = Arc<TelemetryService>;
pub type AttributeMap = HashMap<String, String>;

/// Réglages du service, extraits de la config kernel
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub cache_ttl: Duration,
    pub offline_threshold_secs: u64,
    pub store_timeout: Duration,
    pub retention_secs: i64,
}

impl From<&KernelConfig> for ServiceSettings {
    fn from(cfg: &KernelConfig) -> Self {
        Self {
            cache_ttl: cfg.cache_ttl(),
            offline_threshold_secs: cfg.offline_threshold_secs,
            store_timeout: cfg.store_timeout(),
            retention_secs: cfg.retention_secs(),
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&KernelConfig::default())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub series_entries: usize,
    pub attribute_entries: usize,
}

/// Données de la page détail d'un host
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostDetail {
    pub host_id: String,
    pub name: Option<String>,
    pub info: AttributeMap,
    pub latest: Option<Snapshot>,
    pub latest_timestamp: Option<i64>,
}

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct TelemetryService {
    store: Arc<dyn BackingStore>,
    keys: StoreKeys,
    settings: ServiceSettings,
    series: TtlCache<String, Arc<TimeSeries>>,
    attributes: TtlCache<String, Arc<AttributeMap>>,
    open: RwLock<bool>,
}

impl TelemetryService {
    pub fn new(store: Arc<dyn BackingStore>, keys: StoreKeys, settings: ServiceSettings) -> Self {
        Self {
            store,
            keys,
            settings,
            series: TtlCache::new(),
            attributes: TtlCache::new(),
            open: RwLock::new(true),
        }
    }

    pub fn from_config(store: Arc<dyn BackingStore>, cfg: &KernelConfig) -> Self {
        Self::new(store, cfg.keys(), ServiceSettings::from(cfg))
    }

    pub fn into_shared(self) -> SharedTelemetry {
        Arc::new(self)
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.keys
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    fn ensure_open(&self) -> KernelResult<()> {
        if *self.open.read() {
            Ok(())
        } else {
            Err(KernelError::CacheUnavailable)
        }
    }

    /// Applique `fill` au cache seulement si le service est encore ouvert
    fn fill_if_open(&self, fill: impl FnOnce()) -> KernelResult<()> {
        let open = self.open.read();
        if !*open {
            return Err(KernelError::CacheUnavailable);
        }
        fill();
        Ok(())
    }

    /// Exécute un appel au store sous deadline
    async fn call<T, F>(&self, fut: F) -> KernelResult<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.settings.store_timeout, fut).await {
            Ok(res) => res.map_err(KernelError::from),
            Err(_) => Err(KernelError::Timeout(self.settings.store_timeout)),
        }
    }

    // ---------- Séries temporelles ----------

    async fn pull_series(&self, host_id: &str, now: i64) -> KernelResult<Arc<TimeSeries>> {
        let key = self.keys.collection(host_id);
        let range = self
            .call(self.store.range_by_score(&key, ScoreBound::Inclusive(0.0), ScoreBound::Inclusive(now as f64)))
            .await?;
        let (series, skipped) = TimeSeries::from_range(&range);
        if skipped > 0 {
            warn!(host_id, skipped, kept = series.len(), "series rebuilt with undecodable samples");
        }
        if series.is_empty() {
            return Err(KernelError::NotFound(host_id.to_string()));
        }
        Ok(Arc::new(series))
    }

    /// Série complète d'un host, éventuellement restreinte à `[start, end]`.
    ///
    /// Une série vide côté store donne `NotFound` et n'est pas mise en cache.
    pub async fn get_series(
        &self,
        host_id: &str,
        refresh: bool,
        window: Option<(i64, i64)>,
    ) -> KernelResult<Arc<TimeSeries>> {
        self.ensure_open()?;
        let key = host_id.to_string();
        let full = match (refresh, self.series.get(&key)) {
            (false, Some(cached)) => cached,
            _ => {
                let fresh = self.pull_series(host_id, unix_now()).await?;
                self.fill_if_open(|| self.series.set(key, fresh.clone(), self.settings.cache_ttl))?;
                fresh
            }
        };
        Ok(match window {
            Some((start, end)) => Arc::new(full.window(start, end)),
            None => full,
        })
    }

    /// Dernier échantillon d'un host et son timestamp
    pub async fn get_latest(&self, host_id: &str) -> KernelResult<(i64, Snapshot)> {
        let series = self.get_series(host_id, false, None).await?;
        series
            .back()
            .map(|(ts, snap)| (ts, snap.clone()))
            .ok_or_else(|| KernelError::NotFound(host_id.to_string()))
    }

    /// Valeur la plus récente d'un seul groupe ; groupe vide = `NotFound`
    pub async fn get_latest_group(&self, host_id: &str, group: MetricGroup) -> KernelResult<Value> {
        let (_, latest) = self.get_latest(host_id).await?;
        if latest.group_is_empty(group) {
            return Err(KernelError::NotFound(format!("{host_id}/{group}")));
        }
        latest
            .group(group)
            .cloned()
            .ok_or_else(|| KernelError::NotFound(format!("{host_id}/{group}")))
    }

    /// Payload de graphe ; un host sans données donne un payload vide
    pub async fn get_chart(
        &self,
        host_id: &str,
        group: MetricGroup,
        refresh: bool,
        window: Option<(i64, i64)>,
    ) -> KernelResult<ChartPayload> {
        match self.get_series(host_id, refresh, window).await {
            Ok(series) => Ok(format_series(&series, group)),
            Err(e) if e.is_not_found() => Ok(ChartPayload::empty()),
            Err(e) => Err(e),
        }
    }

    // ---------- Maps d'attributs ----------

    async fn get_attributes(&self, key: String, refresh: bool) -> KernelResult<Arc<AttributeMap>> {
        self.ensure_open()?;
        if !refresh {
            if let Some(cached) = self.attributes.get(&key) {
                return Ok(cached);
            }
        }
        let fresh = Arc::new(self.call(self.store.hash_get_all(&key)).await?);
        self.fill_if_open(|| self.attributes.set(key, fresh.clone(), self.settings.cache_ttl))?;
        Ok(fresh)
    }

    /// Ids des hosts connus, triés
    pub async fn get_host_ids(&self, refresh: bool) -> KernelResult<Vec<String>> {
        let roster = self.get_attributes(self.keys.hashes(), refresh).await?;
        let mut ids: Vec<String> = roster.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Noms d'affichage host id -> nom
    pub async fn get_display_names(&self, refresh: bool) -> KernelResult<Arc<AttributeMap>> {
        self.get_attributes(self.keys.names(), refresh).await
    }

    /// Attributs d'un host ; un hash vide donne `NotFound` et n'est pas mis en cache
    pub async fn get_host_info(&self, host_id: &str, refresh: bool) -> KernelResult<Arc<AttributeMap>> {
        self.ensure_open()?;
        let key = self.keys.info(host_id);
        if !refresh {
            if let Some(cached) = self.attributes.get(&key) {
                return Ok(cached);
            }
        }
        let fresh = self.call(self.store.hash_get_all(&key)).await?;
        if fresh.is_empty() {
            return Err(KernelError::NotFound(host_id.to_string()));
        }
        let fresh = Arc::new(fresh);
        self.fill_if_open(|| self.attributes.set(key, fresh.clone(), self.settings.cache_ttl))?;
        Ok(fresh)
    }

    pub async fn get_host_detail(&self, host_id: &str) -> KernelResult<HostDetail> {
        let info = match self.get_host_info(host_id, false).await {
            Ok(info) => (*info).clone(),
            Err(e) if e.is_not_found() => AttributeMap::new(),
            Err(e) => return Err(e),
        };
        let name = self.get_display_names(false).await?.get(host_id).cloned();
        let (latest_timestamp, latest) = match self.get_latest(host_id).await {
            Ok((ts, snap)) => (Some(ts), Some(snap)),
            Err(e) if e.is_not_found() => (None, None),
            Err(e) => return Err(e),
        };
        if info.is_empty() && latest.is_none() {
            return Err(KernelError::NotFound(host_id.to_string()));
        }
        Ok(HostDetail { host_id: host_id.to_string(), name, info, latest, latest_timestamp })
    }

    // ---------- Roster ----------

    pub async fn get_roster(&self) -> KernelResult<RosterPayload> {
        let ids = self.get_host_ids(false).await?;
        self.compute_roster(&ids).await
    }

    pub async fn compute_roster(&self, host_ids: &[String]) -> KernelResult<RosterPayload> {
        self.compute_roster_at(host_ids, unix_now()).await
    }

    /// Classe chaque host online/offline à l'instant `now`.
    ///
    /// Les hosts dont le dernier échantillon est introuvable sont exclus ;
    /// une info introuvable compte comme une map vide (donc offline).
    /// Les noms d'affichage sont lus une fois pour tout le roster.
    pub async fn compute_roster_at(&self, host_ids: &[String], now: i64) -> KernelResult<RosterPayload> {
        self.ensure_open()?;
        let names = match self.get_display_names(false).await {
            Ok(names) => names,
            Err(KernelError::CacheUnavailable) => return Err(KernelError::CacheUnavailable),
            Err(e) => {
                warn!(error = %e, "display names unavailable for roster");
                Arc::new(AttributeMap::new())
            }
        };
        let fetches = host_ids.iter().map(|host_id| async move {
            let (latest, info) = tokio::join!(self.get_latest(host_id), self.get_host_info(host_id, false));
            (host_id, latest, info)
        });

        let mut roster = RosterPayload::default();
        for (host_id, latest, info) in join_all(fetches).await {
            let latest = match latest {
                Ok((_, snap)) => snap,
                Err(KernelError::CacheUnavailable) => return Err(KernelError::CacheUnavailable),
                Err(e) => {
                    warn!(host_id = %host_id, error = %e, "host excluded from roster");
                    continue;
                }
            };
            let info = match info {
                Ok(info) => (*info).clone(),
                Err(e) => {
                    debug!(host_id = %host_id, error = %e, "no info for host");
                    AttributeMap::new()
                }
            };
            let status = classify(&info, now, self.settings.offline_threshold_secs);
            let name = names.get(host_id).cloned();
            roster.insert(host_id.clone(), latest, info, name, status);
        }
        Ok(roster)
    }

    // ---------- Maintenance & écriture ----------

    pub async fn trim_retention(&self, host_id: &str) -> KernelResult<u64> {
        self.trim_retention_at(host_id, unix_now()).await
    }

    /// Supprime du store les échantillons strictement plus vieux que l'horizon
    pub async fn trim_retention_at(&self, host_id: &str, now: i64) -> KernelResult<u64> {
        self.ensure_open()?;
        let horizon = now.saturating_sub(self.settings.retention_secs);
        let key = self.keys.collection(host_id);
        let removed = self
            .call(self.store.remove_range_by_score(&key, ScoreBound::NegInf, ScoreBound::Exclusive(horizon as f64)))
            .await?;
        if removed > 0 {
            debug!(host_id, removed, horizon, "retention trimmed");
        }
        Ok(removed)
    }

    /// Enregistre un échantillon reçu d'un host.
    ///
    /// Le snapshot est validé avant écriture ; `Update Time` est forcé à `ts`.
    /// La série en cache du host est abandonnée pour que la prochaine lecture
    /// voie l'échantillon.
    pub async fn ingest(
        &self,
        host_id: &str,
        ts: i64,
        raw: &[u8],
        info: AttributeMap,
    ) -> KernelResult<()> {
        self.ensure_open()?;
        decode_snapshot(raw)?;

        let collection = self.keys.collection(host_id);
        self.call(self.store.add_scored(&collection, raw.to_vec(), ts as f64)).await?;
        // l'échantillon est stocké : la série en cache est périmée même si la suite échoue
        self.series.remove(&host_id.to_string());

        let hashes = self.keys.hashes();
        let registration = HashMap::from([(host_id.to_string(), ts.to_string())]);
        self.call(self.store.hash_set(&hashes, registration)).await?;

        let info_key = self.keys.info(host_id);
        let mut info = info;
        info.insert(UPDATE_TIME_FIELD.to_string(), ts.to_string());
        self.call(self.store.hash_set(&info_key, info)).await?;

        self.attributes.remove(&info_key);
        self.attributes.remove(&hashes);
        debug!(host_id, ts, bytes = raw.len(), "sample ingested");
        Ok(())
    }

    /// Enregistre le nom d'affichage d'un host
    pub async fn set_display_name(&self, host_id: &str, name: &str) -> KernelResult<()> {
        self.ensure_open()?;
        let key = self.keys.names();
        let fields = HashMap::from([(host_id.to_string(), name.to_string())]);
        self.call(self.store.hash_set(&key, fields)).await?;
        self.attributes.remove(&key);
        Ok(())
    }

    pub async fn ping_store(&self) -> KernelResult<()> {
        self.call(self.store.ping()).await
    }

    pub fn purge_expired(&self) -> usize {
        self.series.purge_expired() + self.attributes.purge_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            series_entries: self.series.len(),
            attribute_entries: self.attributes.len(),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// Ferme le service : caches vidés, appels suivants en `CacheUnavailable`
    pub fn shutdown(&self) {
        let mut open = self.open.write();
        if *open {
            *open = false;
            self.series.clear();
            self.attributes.clear();
            info!("telemetry service shut down");
        }
    }
}
