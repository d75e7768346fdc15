/**
 * AGRÉGATION - Séries temporelles -> payloads prêts pour les graphes
 *
 * RÔLE :
 * Un formatter explicite par groupe de métriques. Chacun déclare les champs
 * qu'il lit dans le snapshot et renvoie une forme JSON fixe :
 *
 * - Memory  : time + value.{Mem,Swap}            (champ "used", texte tel quel)
 * - Network : time + RX/TX.{megabytes,packets}   (bytes/1048576, packets/1000)
 * - Disk    : time + value.<point de montage>    (champ "used", union des montages)
 * - IO      : time + read/write.{count,megabytes,time}
 * - Load, Thermal, Battery, Ping : time + value.<clé> (numérique, clés variables)
 *
 * TOLÉRANCE :
 * - Échantillon dont le groupe est vide : ignoré (ni temps ni valeurs)
 * - Structure inattendue (sous-objet absent) : échantillon ignoré, warn
 * - Valeur non numérique : seul ce point est ignoré, debug
 * - Série vide ou dernier échantillon sans le groupe : payload vide `{}`
 */

use crate::coerce::{field_f64, is_empty, to_f64};
use crate::error::{KernelError, KernelResult};
use crate::series::TimeSeries;
use crate::snapshot::MetricGroup;
use chrono::{Local, TimeZone};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;
const PACKETS_PER_KILO: f64 = 1_000.0;

/// Payload renvoyé au front pour un graphe
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChartPayload {
    Memory(MemoryChart),
    Network(NetworkChart),
    Disk(DiskChart),
    Io(IoChart),
    Keyed(KeyedChart),
    Empty(EmptyChart),
}

impl ChartPayload {
    pub fn empty() -> Self {
        ChartPayload::Empty(EmptyChart {})
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ChartPayload::Empty(_))
    }

    /// Axe des temps (vide pour le payload vide)
    pub fn time(&self) -> &[String] {
        match self {
            ChartPayload::Memory(c) => &c.time,
            ChartPayload::Network(c) => &c.time,
            ChartPayload::Disk(c) => &c.time,
            ChartPayload::Io(c) => &c.time,
            ChartPayload::Keyed(c) => &c.time,
            ChartPayload::Empty(_) => &[],
        }
    }
}

/// Sérialisé en `{}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmptyChart {}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryChart {
    pub time: Vec<String>,
    pub value: MemorySeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemorySeries {
    #[serde(rename = "Mem")]
    pub mem: Vec<String>,
    #[serde(rename = "Swap")]
    pub swap: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NetworkChart {
    pub time: Vec<String>,
    #[serde(rename = "RX")]
    pub rx: TrafficSeries,
    #[serde(rename = "TX")]
    pub tx: TrafficSeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrafficSeries {
    pub megabytes: Vec<f64>,
    pub packets: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskChart {
    pub time: Vec<String>,
    pub value: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IoChart {
    pub time: Vec<String>,
    pub read: IoSeries,
    pub write: IoSeries,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IoSeries {
    pub count: Vec<f64>,
    pub megabytes: Vec<f64>,
    pub time: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyedChart {
    pub time: Vec<String>,
    pub value: BTreeMap<String, Vec<f64>>,
}

/// Format de l'axe des temps : `MM-DD HH:MM` en heure locale
pub fn format_timestamp(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%m-%d %H:%M").to_string(),
        None => ts.to_string(),
    }
}

/// Variante par nom, pour les appelants qui reçoivent le groupe en texte
pub fn format_series_named(series: &TimeSeries, group: &str) -> KernelResult<ChartPayload> {
    let group: MetricGroup = group.parse()?;
    Ok(format_series(series, group))
}

/// Transforme une série en payload de graphe pour un groupe donné
pub fn format_series(series: &TimeSeries, group: MetricGroup) -> ChartPayload {
    // sonde de présence sur le dernier échantillon
    match series.back() {
        Some((_, latest)) if !latest.group_is_empty(group) => {}
        _ => return ChartPayload::empty(),
    }

    match group {
        MetricGroup::Memory => ChartPayload::Memory(memory_chart(series)),
        MetricGroup::Network => ChartPayload::Network(network_chart(series)),
        MetricGroup::Disk => ChartPayload::Disk(disk_chart(series)),
        MetricGroup::Io => ChartPayload::Io(io_chart(series)),
        MetricGroup::Load | MetricGroup::Thermal | MetricGroup::Battery | MetricGroup::Ping => {
            ChartPayload::Keyed(keyed_chart(series, group))
        }
    }
}

/// Échantillons non vides pour le groupe, avec leur objet
fn samples<'a>(
    series: &'a TimeSeries,
    group: MetricGroup,
) -> impl Iterator<Item = (i64, &'a Map<String, Value>)> + 'a {
    series.iter().filter_map(move |(ts, snap)| {
        let value = snap.group(group);
        if is_empty(value) {
            return None;
        }
        match value {
            Some(Value::Object(map)) => Some((ts, map)),
            _ => {
                warn!(ts, group = %group, "group is not an object, sample skipped");
                None
            }
        }
    })
}

fn sub_object<'a>(map: &'a Map<String, Value>, field: &str) -> KernelResult<&'a Map<String, Value>> {
    map.get(field)
        .and_then(Value::as_object)
        .ok_or_else(|| KernelError::FieldMissing(field.to_string()))
}

/// Ajoute le point si la coercition a réussi, sinon trace et saute
fn push_point(out: &mut Vec<f64>, ts: i64, field: &str, value: KernelResult<f64>) {
    match value {
        Ok(v) => out.push(v),
        Err(e) => debug!(ts, field, error = %e, "point skipped"),
    }
}

struct MemoryRow {
    mem_used: String,
    swap_used: String,
}

fn used_text(map: &Map<String, Value>, field: &str) -> KernelResult<String> {
    match sub_object(map, field)?.get("used") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(KernelError::UnsupportedType("memory used")),
        None => Err(KernelError::FieldMissing(format!("{field}.used"))),
    }
}

fn memory_row(map: &Map<String, Value>) -> KernelResult<MemoryRow> {
    Ok(MemoryRow {
        mem_used: used_text(map, "Mem")?,
        swap_used: used_text(map, "Swap")?,
    })
}

fn memory_chart(series: &TimeSeries) -> MemoryChart {
    let mut chart = MemoryChart::default();
    for (ts, map) in samples(series, MetricGroup::Memory) {
        match memory_row(map) {
            Ok(row) => {
                chart.time.push(format_timestamp(ts));
                chart.value.mem.push(row.mem_used);
                chart.value.swap.push(row.swap_used);
            }
            Err(e) => warn!(ts, error = %e, "memory sample skipped"),
        }
    }
    chart
}

fn push_traffic(out: &mut TrafficSeries, ts: i64, side: &Map<String, Value>) {
    push_point(
        &mut out.megabytes,
        ts,
        "bytes",
        field_f64(side.get("bytes"), "bytes").map(|b| b / BYTES_PER_MEGABYTE),
    );
    push_point(
        &mut out.packets,
        ts,
        "packets",
        field_f64(side.get("packets"), "packets").map(|p| p / PACKETS_PER_KILO),
    );
}

fn network_chart(series: &TimeSeries) -> NetworkChart {
    let mut chart = NetworkChart::default();
    for (ts, map) in samples(series, MetricGroup::Network) {
        let (rx, tx) = match (sub_object(map, "RX"), sub_object(map, "TX")) {
            (Ok(rx), Ok(tx)) => (rx, tx),
            (Err(e), _) | (_, Err(e)) => {
                warn!(ts, error = %e, "network sample skipped");
                continue;
            }
        };
        chart.time.push(format_timestamp(ts));
        push_traffic(&mut chart.rx, ts, rx);
        push_traffic(&mut chart.tx, ts, tx);
    }
    chart
}

fn disk_chart(series: &TimeSeries) -> DiskChart {
    let mut chart = DiskChart::default();
    for (ts, mounts) in samples(series, MetricGroup::Disk) {
        chart.time.push(format_timestamp(ts));
        for (mount, usage) in mounts {
            match usage.get("used") {
                Some(used) => chart.value.entry(mount.clone()).or_default().push(used.clone()),
                None => debug!(ts, mount = %mount, "mount without used value"),
            }
        }
    }
    chart
}

fn push_io(out: &mut IoSeries, ts: i64, side: &Map<String, Value>) {
    push_point(&mut out.count, ts, "count", field_f64(side.get("count"), "count"));
    push_point(
        &mut out.megabytes,
        ts,
        "bytes",
        field_f64(side.get("bytes"), "bytes").map(|b| b / BYTES_PER_MEGABYTE),
    );
    push_point(&mut out.time, ts, "time", field_f64(side.get("time"), "time"));
}

fn io_chart(series: &TimeSeries) -> IoChart {
    let mut chart = IoChart::default();
    for (ts, map) in samples(series, MetricGroup::Io) {
        let (read, write) = match (sub_object(map, "read"), sub_object(map, "write")) {
            (Ok(r), Ok(w)) => (r, w),
            (Err(e), _) | (_, Err(e)) => {
                warn!(ts, error = %e, "io sample skipped");
                continue;
            }
        };
        chart.time.push(format_timestamp(ts));
        push_io(&mut chart.read, ts, read);
        push_io(&mut chart.write, ts, write);
    }
    chart
}

fn keyed_chart(series: &TimeSeries, group: MetricGroup) -> KeyedChart {
    let mut chart = KeyedChart::default();
    for (ts, map) in samples(series, group) {
        chart.time.push(format_timestamp(ts));
        for (key, value) in map {
            match to_f64(value) {
                Ok(v) => chart.value.entry(key.clone()).or_default().push(v),
                Err(e) => debug!(ts, group = %group, key = %key, error = %e, "point skipped"),
            }
        }
    }
    chart
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;
    use serde_json::json;

    fn series(samples: Vec<(i64, Value)>) -> TimeSeries {
        let mut s = TimeSeries::new();
        for (ts, v) in samples {
            let snap: Snapshot = serde_json::from_value(v).unwrap();
            s.insert(ts, snap);
        }
        s
    }

    #[test]
    fn test_memory_scenario() {
        let t1 = 1_700_000_000;
        let s = series(vec![(t1, json!({"Memory": {"Mem": {"used": "512"}, "Swap": {"used": "0"}}}))]);
        let ChartPayload::Memory(chart) = format_series(&s, MetricGroup::Memory) else {
            panic!("expected memory chart");
        };
        assert_eq!(chart.time, vec![format_timestamp(t1)]);
        assert_eq!(chart.value.mem, vec!["512"]);
        assert_eq!(chart.value.swap, vec!["0"]);

        let json = serde_json::to_value(ChartPayload::Memory(chart)).unwrap();
        assert_eq!(json["value"]["Mem"], json!(["512"]));
        assert_eq!(json["value"]["Swap"], json!(["0"]));
    }

    #[test]
    fn test_empty_series_gives_empty_payload() {
        let payload = format_series(&TimeSeries::new(), MetricGroup::Memory);
        assert!(payload.is_empty());
        assert_eq!(serde_json::to_value(&payload).unwrap(), json!({}));
    }

    #[test]
    fn test_latest_sample_without_group_gives_empty_payload() {
        let s = series(vec![
            (100, json!({"Load": {"1min": 0.5}})),
            (160, json!({"Load": {}})),
        ]);
        assert!(format_series(&s, MetricGroup::Load).is_empty());
    }

    #[test]
    fn test_network_scenario() {
        let s = series(vec![(
            100,
            json!({"Network": {
                "RX": {"bytes": 1048576, "packets": 1000},
                "TX": {"bytes": 2097152, "packets": 500}
            }}),
        )]);
        let ChartPayload::Network(chart) = format_series(&s, MetricGroup::Network) else {
            panic!("expected network chart");
        };
        assert_eq!(chart.rx.megabytes, vec![1.0]);
        assert_eq!(chart.rx.packets, vec![1.0]);
        assert_eq!(chart.tx.megabytes, vec![2.0]);
        assert_eq!(chart.tx.packets, vec![0.5]);

        let json = serde_json::to_value(ChartPayload::Network(chart)).unwrap();
        assert_eq!(json["RX"]["megabytes"], json!([1.0]));
        assert_eq!(json["TX"]["packets"], json!([0.5]));
    }

    #[test]
    fn test_network_accepts_string_counters() {
        let s = series(vec![(
            100,
            json!({"Network": {
                "RX": {"bytes": "2097152", "packets": "2000"},
                "TX": {"bytes": 0, "packets": true}
            }}),
        )]);
        let ChartPayload::Network(chart) = format_series(&s, MetricGroup::Network) else {
            panic!("expected network chart");
        };
        assert_eq!(chart.rx.megabytes, vec![2.0]);
        assert_eq!(chart.rx.packets, vec![2.0]);
        assert_eq!(chart.tx.megabytes, vec![0.0]);
        // booléen : point ignoré, le reste du payload est intact
        assert!(chart.tx.packets.is_empty());
        assert_eq!(chart.time.len(), 1);
    }

    #[test]
    fn test_disk_union_of_mounts() {
        let s = series(vec![
            (100, json!({"Disk": {"/": {"used": "10"}}})),
            (160, json!({"Disk": {"/": {"used": "11"}, "/home": {"used": 42}}})),
        ]);
        let ChartPayload::Disk(chart) = format_series(&s, MetricGroup::Disk) else {
            panic!("expected disk chart");
        };
        assert_eq!(chart.time.len(), 2);
        assert_eq!(chart.value["/"], vec![json!("10"), json!("11")]);
        assert_eq!(chart.value["/home"], vec![json!(42)]);
    }

    #[test]
    fn test_io_six_series() {
        let s = series(vec![(
            100,
            json!({"IO": {
                "read": {"count": "12", "bytes": 3145728, "time": 40},
                "write": {"count": 7, "bytes": "1048576", "time": "15"}
            }}),
        )]);
        let ChartPayload::Io(chart) = format_series(&s, MetricGroup::Io) else {
            panic!("expected io chart");
        };
        assert_eq!(chart.read.count, vec![12.0]);
        assert_eq!(chart.read.megabytes, vec![3.0]);
        assert_eq!(chart.read.time, vec![40.0]);
        assert_eq!(chart.write.count, vec![7.0]);
        assert_eq!(chart.write.megabytes, vec![1.0]);
        assert_eq!(chart.write.time, vec![15.0]);
    }

    #[test]
    fn test_load_skips_empty_samples() {
        let s = series(vec![
            (100, json!({"Load": {"1min": 0.5, "5min": "0.25"}})),
            (160, json!({"Load": {}})),
            (220, json!({"Memory": {"Mem": {"used": "1"}}})),
            (280, json!({"Load": {"1min": 1.5, "5min": 0.75, "15min": 0.1}})),
        ]);
        let ChartPayload::Keyed(chart) = format_series(&s, MetricGroup::Load) else {
            panic!("expected keyed chart");
        };
        assert_eq!(chart.time, vec![format_timestamp(100), format_timestamp(280)]);
        assert_eq!(chart.value["1min"], vec![0.5, 1.5]);
        assert_eq!(chart.value["5min"], vec![0.25, 0.75]);
        assert_eq!(chart.value["15min"], vec![0.1]);
    }

    #[test]
    fn test_thermal_per_sensor() {
        let s = series(vec![
            (100, json!({"Thermal": {"cpu": 48.0, "gpu": 51}})),
            (160, json!({"Thermal": {"cpu": "49.5"}})),
        ]);
        let payload = format_series(&s, MetricGroup::Thermal);
        assert_eq!(payload.time().len(), 2);
        let ChartPayload::Keyed(chart) = payload else { panic!("expected keyed chart") };
        assert_eq!(chart.value["cpu"], vec![48.0, 49.5]);
        assert_eq!(chart.value["gpu"], vec![51.0]);
    }

    #[test]
    fn test_battery_skips_non_numeric_entries() {
        let s = series(vec![(100, json!({"Battery": {"percent": 87, "power_plugged": true}}))]);
        let ChartPayload::Keyed(chart) = format_series(&s, MetricGroup::Battery) else {
            panic!("expected keyed chart");
        };
        assert_eq!(chart.value["percent"], vec![87.0]);
        assert!(!chart.value.contains_key("power_plugged"));
    }

    #[test]
    fn test_malformed_memory_sample_does_not_abort() {
        let s = series(vec![
            (100, json!({"Memory": {"Mem": {"total": "1024"}}})),
            (160, json!({"Memory": {"Mem": {"used": "256"}, "Swap": {"used": "8"}}})),
        ]);
        let ChartPayload::Memory(chart) = format_series(&s, MetricGroup::Memory) else {
            panic!("expected memory chart");
        };
        assert_eq!(chart.time, vec![format_timestamp(160)]);
        assert_eq!(chart.value.mem, vec!["256"]);
    }

    #[test]
    fn test_unknown_group_is_typed_error() {
        let err = format_series_named(&TimeSeries::new(), "Cpu").unwrap_err();
        assert!(matches!(err, KernelError::UnknownMetricGroup(_)));
        assert!(format_series_named(&TimeSeries::new(), "memory").unwrap().is_empty());
    }
}
