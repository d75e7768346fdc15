/**
 * ROSTER - Classification online/offline des hosts connus
 *
 * RÔLE : Partie pure du calcul du roster. Le fetch (dernier snapshot + info
 * de chaque host) est fait par `TelemetryService::compute_roster`.
 *
 * RÈGLE : un host est offline ssi `now - info["Update Time"] > seuil`.
 * "Update Time" absent ou illisible compte comme 0 : le host est offline.
 */

use crate::snapshot::Snapshot;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Clé du hash info portant la date du dernier report
pub const UPDATE_TIME_FIELD: &str = "Update Time";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    Offline,
}

/// Date du dernier report (secondes Unix), 0 si absente ou illisible
pub fn update_time(info: &HashMap<String, String>) -> f64 {
    info.get(UPDATE_TIME_FIELD)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

pub fn classify(info: &HashMap<String, String>, now: i64, offline_threshold_secs: u64) -> HostStatus {
    if now as f64 - update_time(info) > offline_threshold_secs as f64 {
        HostStatus::Offline
    } else {
        HostStatus::Online
    }
}

/// Vue d'ensemble de tous les hosts.
///
/// `names` ne contient que les hosts classés qui ont un nom d'affichage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RosterPayload {
    pub online: BTreeMap<String, Snapshot>,
    pub offline: BTreeMap<String, Snapshot>,
    pub info: BTreeMap<String, HashMap<String, String>>,
    pub names: BTreeMap<String, String>,
}

impl RosterPayload {
    /// Range un host dans la bonne liste ; un host n'apparaît jamais dans les deux
    pub fn insert(
        &mut self,
        host_id: String,
        latest: Snapshot,
        info: HashMap<String, String>,
        name: Option<String>,
        status: HostStatus,
    ) {
        self.online.remove(&host_id);
        self.offline.remove(&host_id);
        match name {
            Some(name) => self.names.insert(host_id.clone(), name),
            None => self.names.remove(&host_id),
        };
        match status {
            HostStatus::Online => self.online.insert(host_id.clone(), latest),
            HostStatus::Offline => self.offline.insert(host_id.clone(), latest),
        };
        self.info.insert(host_id, info);
    }

    pub fn status_of(&self, host_id: &str) -> Option<HostStatus> {
        if self.online.contains_key(host_id) {
            Some(HostStatus::Online)
        } else if self.offline.contains_key(host_id) {
            Some(HostStatus::Offline)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.online.len() + self.offline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
