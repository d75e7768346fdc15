/*!
Builder de snapshots de télémétrie pour tests

Produit des snapshots JSON au format des agents de monitoring, groupe par
groupe, pour alimenter un store de test sans agent réel.
*/

use anyhow::Result;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Default)]
pub struct SnapshotBuilder {
    groups: Map<String, Value>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Groupe arbitraire, tel quel
    pub fn group<S: Into<String>>(mut self, name: S, value: Value) -> Self {
        self.groups.insert(name.into(), value);
        self
    }

    /// `Memory.Mem.used` / `Memory.Swap.used`, transmis comme texte
    pub fn memory(self, mem_used: &str, swap_used: &str) -> Self {
        self.group(
            "Memory",
            json!({
                "Mem": {"used": mem_used},
                "Swap": {"used": swap_used}
            }),
        )
    }

    pub fn network(self, rx_bytes: f64, rx_packets: f64, tx_bytes: f64, tx_packets: f64) -> Self {
        self.group(
            "Network",
            json!({
                "RX": {"bytes": rx_bytes, "packets": rx_packets},
                "TX": {"bytes": tx_bytes, "packets": tx_packets}
            }),
        )
    }

    /// Ajoute (ou remplace) un point de montage dans le groupe Disk
    pub fn disk(mut self, mount: &str, used: Value) -> Self {
        let entry = self
            .groups
            .entry("Disk".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(mounts) = entry {
            mounts.insert(mount.to_string(), json!({"used": used}));
        }
        self
    }

    /// `IO.read` / `IO.write` avec count, bytes et time (ms)
    pub fn io(self, read: (f64, f64, f64), write: (f64, f64, f64)) -> Self {
        self.group(
            "IO",
            json!({
                "read": {"count": read.0, "bytes": read.1, "time": read.2},
                "write": {"count": write.0, "bytes": write.1, "time": write.2}
            }),
        )
    }

    pub fn load(self, one: f64, five: f64, fifteen: f64) -> Self {
        self.group("Load", json!({"1m": one, "5m": five, "15m": fifteen}))
    }

    /// Capteurs de température, valeur brute (nombre ou texte)
    pub fn thermal(self, sensors: &[(&str, Value)]) -> Self {
        let map: Map<String, Value> = sensors.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        self.group("Thermal", Value::Object(map))
    }

    pub fn battery(self, percent: f64, plugged: bool) -> Self {
        self.group("Battery", json!({"percent": percent, "power_plugged": plugged}))
    }

    pub fn ping(self, targets: &[(&str, f64)]) -> Self {
        let map: Map<String, Value> = targets.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
        self.group("Ping", Value::Object(map))
    }

    pub fn build(&self) -> Value {
        Value::Object(self.groups.clone())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.build())?)
    }
}
