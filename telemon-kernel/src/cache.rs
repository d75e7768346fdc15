/**
 * TTL CACHE - Cache local à expiration, verrouillé par shard
 *
 * RÔLE : Premier niveau devant le store. Une entrée n'est visible que tant
 * que `now < inserted_at + ttl` ; expirée, elle se comporte comme absente.
 *
 * CONCURRENCE :
 * - DashMap : un verrou par shard, deux hosts différents ne se bloquent pas
 * - `set` remplace l'entrée d'un coup (jamais de valeur à moitié écrite)
 * - Deux `set` concurrents sur la même clé : le dernier gagne
 *
 * HORLOGE : `tokio::time::Instant`, pour pouvoir figer/avancer le temps en test.
 */

use dashmap::DashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.inserted_at + self.ttl
    }
}

/// Cache clé -> valeur avec TTL par entrée.
///
/// Les valeurs sont clonées à la lecture : stocker des `Arc` pour les gros objets.
#[derive(Debug)]
pub struct TtlCache<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Valeur si présente et non expirée
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(
            key,
            CacheEntry { value, inserted_at: Instant::now(), ttl },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    /// Supprime physiquement les entrées expirées, retourne combien
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Nombre d'entrées stockées, expirées comprises
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
