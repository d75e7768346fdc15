/**
 * FILE STORE - Keyspace persisté en fichier JSON
 *
 * RÔLE :
 * Backend par défaut du binaire quand aucun store externe n'est branché.
 * Même modèle que `MemoryStore` (sorted sets + hashes) avec une copie
 * sur disque réécrite à chaque écriture et rechargée au démarrage.
 *
 * FONCTIONNEMENT :
 * - Lecture : uniquement depuis le keyspace en mémoire
 * - Écriture : mutation en mémoire puis dump JSON complet (pretty)
 * - Un mutex async sérialise les écritures pour que l'ordre sur disque
 *   suive l'ordre des mutations
 * - Les membres doivent être du texte UTF-8 (les snapshots sont du JSON)
 */

use super::memory::{Keyspace, SortedSet};
use super::{BackingStore, ScoreBound, ScoredMember, StoreError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Format sur disque d'un membre de sorted set
#[derive(Debug, Serialize, Deserialize)]
struct PersistedMember {
    score: f64,
    member: String,
}

/// Format sur disque du keyspace
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedKeyspace {
    #[serde(default)]
    zsets: HashMap<String, Vec<PersistedMember>>,
    #[serde(default)]
    hashes: HashMap<String, HashMap<String, String>>,
}

impl PersistedKeyspace {
    fn from_keyspace(keyspace: &Keyspace) -> Result<Self, StoreError> {
        let mut zsets = HashMap::with_capacity(keyspace.zsets.len());
        for (key, zset) in &keyspace.zsets {
            let members = zset
                .iter()
                .map(|m| {
                    String::from_utf8(m.member.clone())
                        .map(|member| PersistedMember { score: m.score, member })
                        .map_err(|_| StoreError::Encoding)
                })
                .collect::<Result<Vec<_>, _>>()?;
            zsets.insert(key.clone(), members);
        }
        Ok(Self { zsets, hashes: keyspace.hashes.clone() })
    }

    fn into_keyspace(self) -> Keyspace {
        let mut keyspace = Keyspace { hashes: self.hashes, ..Keyspace::default() };
        for (key, members) in self.zsets {
            let mut zset = SortedSet::default();
            for m in members {
                zset.add(m.member.into_bytes(), m.score);
            }
            keyspace.zsets.insert(key, zset);
        }
        keyspace
    }
}

pub struct FileStore {
    storage_path: PathBuf,
    keyspace: RwLock<Keyspace>,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Ouvre (ou crée) le fichier de stockage et charge son contenu
    pub async fn open<P: Into<PathBuf>>(storage_path: P) -> Result<Self, StoreError> {
        let path = storage_path.into();
        let keyspace = Self::load_from_disk(&path).await?;
        info!(
            path = %path.display(),
            zsets = keyspace.zsets.len(),
            hashes = keyspace.hashes.len(),
            "file store opened"
        );
        Ok(Self {
            storage_path: path,
            keyspace: RwLock::new(keyspace),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn load_from_disk(path: &Path) -> Result<Keyspace, StoreError> {
        if !tokio::fs::try_exists(path).await? {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, "{}").await?;
            return Ok(Keyspace::default());
        }

        let content = tokio::fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(Keyspace::default());
        }
        let persisted: PersistedKeyspace = serde_json::from_str(&content)?;
        Ok(persisted.into_keyspace())
    }

    /// Applique une mutation puis réécrit le fichier
    async fn mutate<T>(&self, op: impl FnOnce(&mut Keyspace) -> T) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().await;
        let (out, json) = {
            let mut keyspace = self.keyspace.write();
            let out = op(&mut keyspace);
            let persisted = PersistedKeyspace::from_keyspace(&keyspace)?;
            (out, serde_json::to_string_pretty(&persisted)?)
        };
        tokio::fs::write(&self.storage_path, json).await?;
        debug!(path = %self.storage_path.display(), "file store saved");
        Ok(out)
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }
}

#[async_trait]
impl BackingStore for FileStore {
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
        if !self.keyspace.read().zsets.contains_key(key) {
            return Ok(0);
        }
        self.mutate(|ks| ks.remove_range_by_score(key, min, max)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.keyspace.read().exists(key))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if tokio::fs::try_exists(&self.storage_path).await? {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "storage file {} is gone",
                self.storage_path.display()
            )))
        }
    }

    async fn add_scored(&self, key: &str, member: Vec<u8>, score: f64) -> Result<bool, StoreError> {
        if std::str::from_utf8(&member).is_err() {
            return Err(StoreError::Encoding);
        }
        self.mutate(|ks| ks.add_scored(key, member, score)).await
    }

    async fn hash_set(&self, key: &str, fields: HashMap<String, String>) -> Result<(), StoreError> {
        self.mutate(|ks| ks.hash_set(key, fields)).await
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
