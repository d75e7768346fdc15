/**
 * SNAPSHOTS - Un échantillon de télémétrie pour un host à un instant donné
 *
 * RÔLE : Décodage du texte JSON stocké dans le sorted set `collection:<host>`
 * vers une map générique groupe -> valeur, sans schéma imposé.
 *
 * FONCTIONNEMENT :
 * - Les reporters envoient des formes variables selon l'OS (clés de Load, capteurs
 *   de Thermal, points de montage...), donc on garde l'arbre JSON tel quel
 * - Les champs inconnus sont conservés, les champs absents sont simplement absents
 * - `MetricGroup` énumère les groupes connus pour le dispatch des formatters
 */

use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Groupes de métriques reconnus dans un snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricGroup {
    Memory,
    Network,
    Disk,
    #[serde(rename = "IO")]
    Io,
    Load,
    Thermal,
    Battery,
    Ping,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 8] = [
        MetricGroup::Memory,
        MetricGroup::Network,
        MetricGroup::Disk,
        MetricGroup::Io,
        MetricGroup::Load,
        MetricGroup::Thermal,
        MetricGroup::Battery,
        MetricGroup::Ping,
    ];

    /// Nom de la clé dans le snapshot
    pub fn key(self) -> &'static str {
        match self {
            MetricGroup::Memory => "Memory",
            MetricGroup::Network => "Network",
            MetricGroup::Disk => "Disk",
            MetricGroup::Io => "IO",
            MetricGroup::Load => "Load",
            MetricGroup::Thermal => "Thermal",
            MetricGroup::Battery => "Battery",
            MetricGroup::Ping => "Ping",
        }
    }
}

impl fmt::Display for MetricGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for MetricGroup {
    type Err = KernelError;

    /// Accepte la casse du snapshot ("IO") et celle des routes ("io", "memory")
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricGroup::ALL
            .into_iter()
            .find(|g| g.key().eq_ignore_ascii_case(s))
            .ok_or_else(|| KernelError::UnknownMetricGroup(s.to_string()))
    }
}

/// Un échantillon décodé : nom de groupe -> valeur arbitraire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Map<String, Value>);

impl Snapshot {
    pub fn new(groups: Map<String, Value>) -> Self {
        Self(groups)
    }

    /// Valeur brute d'un groupe par son nom
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn group(&self, group: MetricGroup) -> Option<&Value> {
        self.0.get(group.key())
    }

    /// Vrai si le groupe est absent ou vide dans cet échantillon
    pub fn group_is_empty(&self, group: MetricGroup) -> bool {
        crate::coerce::is_empty(self.group(group))
    }

    pub fn groups(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Décode un membre brut du sorted set en [`Snapshot`].
///
/// Seul un objet JSON est accepté ; tout le reste est une erreur de décodage
/// que l'appelant doit sauter sans abandonner la série.
pub fn decode_snapshot(raw: &[u8]) -> KernelResult<Snapshot> {
    let value: Value = serde_json::from_slice(raw)?;
    match value {
        Value::Object(map) => Ok(Snapshot(map)),
        Value::Array(_) => Err(KernelError::NotAnObject("array")),
        Value::String(_) => Err(KernelError::NotAnObject("string")),
        Value::Number(_) => Err(KernelError::NotAnObject("number")),
        Value::Bool(_) => Err(KernelError::NotAnObject("bool")),
        Value::Null => Err(KernelError::NotAnObject("null")),
    }
}
