/**
 * BACKING STORE - Contrat minimal entre le kernel et le store persistant
 *
 * RÔLE :
 * Le kernel ne parle jamais directement à un store concret : il passe par
 * le trait `BackingStore`, calqué sur les commandes sorted set / hash d'un
 * store clé-valeur (ZRANGEBYSCORE, HGETALL, ZREMRANGEBYSCORE...).
 *
 * FONCTIONNEMENT :
 * - `collection:<host>` : sorted set, score = timestamp Unix, membre = snapshot JSON
 * - `hashes`            : roster des hosts connus
 * - `info:<host>`       : attributs texte d'un host ("Update Time", plateforme...)
 * - `name`              : noms d'affichage host -> nom
 * Toutes les clés sont préfixées (`system_monitor:` par défaut).
 *
 * IMPLÉMENTATIONS :
 * - `MemoryStore` : volatile, pour le dev et les tests
 * - `FileStore`   : même modèle, persisté en JSON à chaque écriture
 */

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Erreurs possibles lors des appels au store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Member is not valid UTF-8 text")]
    Encoding,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Un membre de sorted set avec son score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: Vec<u8>,
    pub score: f64,
}

/// Borne d'un range par score (équivalent de `-inf`, `+inf`, `(x` et `x`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Inclusive(f64),
    Exclusive(f64),
}

impl ScoreBound {
    /// `score` respecte-t-il cette borne utilisée comme minimum ?
    pub fn admits_above(self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Inclusive(min) => score >= min,
            ScoreBound::Exclusive(min) => score > min,
        }
    }

    /// `score` respecte-t-il cette borne utilisée comme maximum ?
    pub fn admits_below(self, score: f64) -> bool {
        match self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Inclusive(max) => score <= max,
            ScoreBound::Exclusive(max) => score < max,
        }
    }

    pub fn contains(min: ScoreBound, max: ScoreBound, score: f64) -> bool {
        min.admits_above(score) && max.admits_below(score)
    }
}

/// Interface que tout store utilisé par le kernel doit implémenter.
///
/// Chaque appel peut suspendre sur de l'I/O ; le kernel les enveloppe tous
/// dans un timeout et peut les abandonner (drop du future) à l'arrêt.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Membres d'un sorted set dans `[min, max]`, triés par score croissant
    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// Tous les champs d'un hash (map vide si la clé n'existe pas)
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Supprime les membres dont le score est dans `[min, max]`, retourne le nombre supprimé
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Ajoute (ou re-score) un membre ; vrai si le membre est nouveau
    async fn add_scored(&self, key: &str, member: Vec<u8>, score: f64) -> Result<bool, StoreError>;

    /// Fusionne des champs dans un hash
    async fn hash_set(&self, key: &str, fields: HashMap<String, String>) -> Result<(), StoreError>;

    /// Nom court pour les logs et le health
    fn name(&self) -> &'static str;
}

/// Construction des clés du store, toutes sous le même préfixe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new<S: Into<String>>(prefix: S) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn collection(&self, host_id: &str) -> String {
        format!("{}collection:{}", self.prefix, host_id)
    }

    pub fn hashes(&self) -> String {
        format!("{}hashes", self.prefix)
    }

    pub fn info(&self, host_id: &str) -> String {
        format!("{}info:{}", self.prefix, host_id)
    }

    pub fn names(&self) -> String {
        format!("{}name", self.prefix)
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("system_monitor:")
    }
}
