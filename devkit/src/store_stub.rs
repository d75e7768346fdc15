/*!
Stub du backing store pour développement et tests

Enveloppe un `MemoryStore` et :
- enregistre chaque appel (opération + clé) pour les assertions de tests
- permet d'injecter des pannes (N prochains appels, en continu, ou par opération + clé)
- permet d'injecter une latence, pour tester les timeouts
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemon_kernel::store::memory::Keyspace;
use telemon_kernel::store::{BackingStore, MemoryStore, ScoreBound, ScoredMember, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    RangeByScore,
    HashGetAll,
    RemoveRangeByScore,
    Exists,
    Ping,
    AddScored,
    HashSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub key: String,
}

/// Store en mémoire instrumenté, clonable (état partagé)
#[derive(Clone, Default)]
pub struct StubStore {
    inner: Arc<MemoryStore>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
    fail_next: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    key_faults: Arc<Mutex<HashSet<(StoreOp, String)>>>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl StubStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accès direct au store sous-jacent, sans journalisation
    pub fn backend(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn dump(&self) -> Keyspace {
        self.inner.dump()
    }

    /// Les `n` prochains appels échouent avec `Unavailable`
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Tous les appels échouent jusqu'à `set_failing(false)`
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Tous les appels `op` sur `key` échouent, les autres passent
    pub fn fail_key(&self, op: StoreOp, key: &str) {
        self.key_faults.lock().insert((op, key.to_string()));
    }

    pub fn clear_key_faults(&self) {
        self.key_faults.lock().clear();
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Nombre d'appels `op` sur `key`
    pub fn count(&self, op: StoreOp, key: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op && c.key == key).count()
    }

    pub fn count_op(&self, op: StoreOp) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    async fn enter(&self, op: StoreOp, key: &str) -> Result<(), StoreError> {
        self.calls.lock().push(StoreCall { op, key: key.to_string() });
        log::debug!("[stub-store] {:?} {}", op, key);

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("stub store is failing".into()));
        }
        if self.key_faults.lock().contains(&(op, key.to_string())) {
            return Err(StoreError::Unavailable(format!("injected failure on {key}")));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BackingStore for StubStore {
    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        self.enter(StoreOp::RangeByScore, key).await?;
        self.inner.range_by_score(key, min, max).await
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.enter(StoreOp::HashGetAll, key).await?;
        self.inner.hash_get_all(key).await
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError> {
        self.enter(StoreOp::RemoveRangeByScore, key).await?;
        self.inner.remove_range_by_score(key, min, max).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.enter(StoreOp::Exists, key).await?;
        self.inner.exists(key).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.enter(StoreOp::Ping, "").await?;
        self.inner.ping().await
    }

    async fn add_scored(&self, key: &str, member: Vec<u8>, score: f64) -> Result<bool, StoreError> {
        self.enter(StoreOp::AddScored, key).await?;
        self.inner.add_scored(key, member, score).await
    }

    async fn hash_set(&self, key: &str, fields: HashMap<String, String>) -> Result<(), StoreError> {
        self.enter(StoreOp::HashSet, key).await?;
        self.inner.hash_set(key, fields).await
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}
