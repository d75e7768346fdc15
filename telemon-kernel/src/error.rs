/**
 * ERREURS KERNEL - Taxonomie des erreurs du moteur de télémétrie
 *
 * RÔLE : Un seul enum pour tout ce qui peut mal tourner entre le store,
 * le décodage des snapshots, la coercition numérique et le cache.
 *
 * GRANULARITÉ :
 * - Decode / UnsupportedType / FieldMissing : contenues à l'échantillon ou au point
 * - NotFound : pas de données pour un host, rendu vide côté appelant
 * - Store / Timeout : remontées à l'appelant, loguées par la boucle de maintenance
 * - CacheUnavailable : service arrêté, seule erreur escaladée systématiquement
 */

use crate::store::StoreError;
use std::time::Duration;

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("snapshot is not a JSON object (got {0})")]
    NotAnObject(&'static str),
    #[error("unsupported numeric encoding: {0}")]
    UnsupportedType(&'static str),
    #[error("field missing: {0}")]
    FieldMissing(String),
    #[error("no data found for host {0}")]
    NotFound(String),
    #[error("unknown metric group: {0}")]
    UnknownMetricGroup(String),
    #[error("backing store error: {0}")]
    Store(#[from] StoreError),
    #[error("backing store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("telemetry cache is not available (service shut down)")]
    CacheUnavailable,
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl KernelError {
    /// Vrai pour les erreurs qui signifient "rien à montrer" plutôt qu'une panne
    pub fn is_not_found(&self) -> bool {
        matches!(self, KernelError::NotFound(_))
    }
}
