/**
 * MEMORY STORE - Sorted sets et hashes en mémoire
 *
 * RÔLE : Implémentation volatile du `BackingStore`. Sert de moteur au
 * `FileStore` (qui ne fait que persister le même `Keyspace`) et de store
 * de test pour le devkit.
 *
 * FONCTIONNEMENT :
 * - Un sorted set = Vec trié par (score, membre) : même ordre qu'un ZRANGE
 * - Re-scorer un membre existant le déplace, il n'est jamais dupliqué
 * - Verrou parking_lot tenu uniquement le temps d'une opération
 */

use super::{BackingStore, ScoreBound, ScoredMember, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Sorted set : membres uniques ordonnés par score puis par octets
#[derive(Debug, Clone, Default)]
pub struct SortedSet {
    entries: Vec<ScoredMember>,
}

impl SortedSet {
    fn cmp_entry(a: &ScoredMember, score: f64, member: &[u8]) -> Ordering {
        a.score
            .total_cmp(&score)
            .then_with(|| a.member.as_slice().cmp(member))
    }

    /// Vrai si le membre n'existait pas
    pub fn add(&mut self, member: Vec<u8>, score: f64) -> bool {
        let existed = match self.entries.iter().position(|e| e.member == member) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        };
        let at = self
            .entries
            .partition_point(|e| Self::cmp_entry(e, score, &member) == Ordering::Less);
        self.entries.insert(at, ScoredMember { member, score });
        !existed
    }

    pub fn range(&self, min: ScoreBound, max: ScoreBound) -> Vec<ScoredMember> {
        self.entries
            .iter()
            .filter(|e| ScoreBound::contains(min, max, e.score))
            .cloned()
            .collect()
    }

    pub fn remove_range(&mut self, min: ScoreBound, max: ScoreBound) -> u64 {
        let before = self.entries.len();
        self.entries.retain(|e| !ScoreBound::contains(min, max, e.score));
        (before - self.entries.len()) as u64
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredMember> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Espace de clés complet : sorted sets + hashes
#[derive(Debug, Clone, Default)]
pub struct Keyspace {
    pub zsets: HashMap<String, SortedSet>,
    pub hashes: HashMap<String, HashMap<String, String>>,
}

impl Keyspace {
    pub fn range_by_score(&self, key: &str, min: ScoreBound, max: ScoreBound) -> Vec<ScoredMember> {
        self.zsets
            .get(key)
            .map(|z| z.range(min, max))
            .unwrap_or_default()
    }

    pub fn remove_range_by_score(&mut self, key: &str, min: ScoreBound, max: ScoreBound) -> u64 {
        let Some(zset) = self.zsets.get_mut(key) else { return 0; };
        let removed = zset.remove_range(min, max);
        // une clé vide disparaît, comme côté store réel
        if zset.is_empty() {
            self.zsets.remove(key);
        }
        removed
    }

    pub fn add_scored(&mut self, key: &str, member: Vec<u8>, score: f64) -> bool {
        self.zsets.entry(key.to_string()).or_default().add(member, score)
    }

    pub fn hash_get_all(&self, key: &str) -> HashMap<String, String> {
        self.hashes.get(key).cloned().unwrap_or_default()
    }

    pub fn hash_set(&mut self, key: &str, fields: HashMap<String, String>) {
        self.hashes.entry(key.to_string()).or_default().extend(fields);
    }

    pub fn exists(&self, key: &str) -> bool {
        self.zsets.contains_key(key) || self.hashes.contains_key(key)
    }
}

/// Store volatile : tout est perdu à l'arrêt du process
#[derive(Debug, Default)]
pub struct MemoryStore {
    keyspace: RwLock<Keyspace>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyspace(keyspace: Keyspace) -> Self {
        Self { keyspace: RwLock::new(keyspace) }
    }

    /// Copie de l'état courant (tests, persistance)
    pub fn dump(&self) -> Keyspace {
        self.keyspace.read().clone()
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        Ok(self.keyspace.read().range_by_score(key, min, max))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        Ok(self.keyspace.read().hash_get_all(key))
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError> {
        Ok(self.keyspace.write().remove_range_by_score(key, min, max))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.keyspace.read().exists(key))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn add_scored(&self, key: &str, member: Vec<u8>, score: f64) -> Result<bool, StoreError> {
        Ok(self.keyspace.write().add_scored(key, member, score))
    }

    async fn hash_set(&self, key: &str, fields: HashMap<String, String>) -> Result<(), StoreError> {
        self.keyspace.write().hash_set(key, fields);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
