//! Propriétés de bout en bout du kernel, vues à travers le store instrumenté

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use telemon_devkit::{SnapshotBuilder, StoreOp, TestHarness};
use telemon_kernel::service::{unix_now, CacheStats, ServiceSettings, TelemetryService};
use telemon_kernel::store::{BackingStore, FileStore, ScoreBound, StoreKeys};
use telemon_kernel::{ChartPayload, KernelError, MetricGroup};

#[tokio::test]
async fn cached_series_is_served_without_store_read() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();

    let a = h.telemetry.get_series("h1", false, None).await.unwrap();
    let b = h.telemetry.get_series("h1", false, None).await.unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(h.series_reads("h1"), 1);
}

#[tokio::test]
async fn refresh_always_reads_the_store() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();

    for _ in 0..3 {
        h.telemetry.get_series("h1", true, None).await.unwrap();
    }
    assert_eq!(h.series_reads("h1"), 3);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_pulled_again() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();

    h.telemetry.get_series("h1", false, None).await.unwrap();
    tokio::time::advance(Duration::from_secs(299)).await;
    h.telemetry.get_series("h1", false, None).await.unwrap();
    assert_eq!(h.series_reads("h1"), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    h.telemetry.get_series("h1", false, None).await.unwrap();
    assert_eq!(h.series_reads("h1"), 2);
}

#[tokio::test]
async fn failed_pull_is_never_cached() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();

    h.store.fail_next(1);
    let err = h.telemetry.get_series("h1", false, None).await.unwrap_err();
    assert!(matches!(err, KernelError::Store(_)));
    assert_eq!(h.telemetry.cache_stats().series_entries, 0);

    // la requête suivante retente
    assert_eq!(h.telemetry.get_series("h1", false, None).await.unwrap().len(), 1);
    assert_eq!(h.series_reads("h1"), 2);
}

#[tokio::test]
async fn failed_refresh_keeps_previous_entry() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();
    h.telemetry.get_series("h1", false, None).await.unwrap();

    h.seed_sample("h1", 200, &json!({"Load": {"1m": 2}})).await.unwrap();
    h.store.fail_next(1);
    assert!(h.telemetry.get_series("h1", true, None).await.is_err());

    let cached = h.telemetry.get_series("h1", false, None).await.unwrap();
    assert_eq!(cached.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_store_times_out() {
    let settings = ServiceSettings { store_timeout: Duration::from_secs(1), ..ServiceSettings::default() };
    let h = TestHarness::with_settings(settings);
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();
    h.store.set_delay(Some(Duration::from_secs(20)));

    let err = h.telemetry.get_series("h1", false, None).await.unwrap_err();
    assert!(matches!(err, KernelError::Timeout(d) if d == Duration::from_secs(1)));
}

#[tokio::test]
async fn undecodable_samples_are_skipped() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();
    h.seed_garbage("h1", 150, b"{not json").await.unwrap();
    h.seed_garbage("h1", 175, b"\"just a string\"").await.unwrap();
    h.seed_sample("h1", 200, &json!({"Load": {"1m": 2}})).await.unwrap();

    let series = h.telemetry.get_series("h1", false, None).await.unwrap();
    assert_eq!(series.iter().map(|(ts, _)| ts).collect::<Vec<_>>(), vec![100, 200]);
}

#[tokio::test]
async fn network_chart_end_to_end() {
    let h = TestHarness::new();
    let sample = SnapshotBuilder::new().network(1_048_576.0, 1_000.0, 2_097_152.0, 500.0);
    h.seed_built("h1", 100, &sample).await.unwrap();

    match h.telemetry.get_chart("h1", MetricGroup::Network, false, None).await.unwrap() {
        ChartPayload::Network(chart) => {
            assert_eq!(chart.time.len(), 1);
            assert_eq!(chart.rx.megabytes, vec![1.0]);
            assert_eq!(chart.rx.packets, vec![1.0]);
            assert_eq!(chart.tx.megabytes, vec![2.0]);
            assert_eq!(chart.tx.packets, vec![0.5]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn chart_time_axis_counts_non_empty_samples() {
    let h = TestHarness::new();
    h.seed_built("h1", 100, &SnapshotBuilder::new().memory("1G", "0B")).await.unwrap();
    h.seed_built("h1", 200, &SnapshotBuilder::new().load(0.1, 0.2, 0.3)).await.unwrap();
    h.seed_built("h1", 300, &SnapshotBuilder::new().memory("2G", "1M")).await.unwrap();

    match h.telemetry.get_chart("h1", MetricGroup::Memory, false, None).await.unwrap() {
        ChartPayload::Memory(chart) => {
            assert_eq!(chart.time.len(), 2);
            assert_eq!(chart.value.mem, vec!["1G", "2G"]);
            assert_eq!(chart.value.swap, vec!["0B", "1M"]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // dernier échantillon sans Load : payload vide
    let load = h.telemetry.get_chart("h1", MetricGroup::Load, false, None).await.unwrap();
    assert!(load.is_empty());
}

#[tokio::test]
async fn roster_partitions_hosts_by_update_time() {
    let h = TestHarness::new();
    let now = unix_now();
    let hosts = [("fresh", now - 10), ("edge", now - 600), ("stale", now - 601), ("silent", 0)];
    for (host, update) in hosts {
        h.seed_built(host, now - 700, &SnapshotBuilder::new().load(0.1, 0.1, 0.1)).await.unwrap();
        if update > 0 {
            h.seed_info(host, update, &[]).await.unwrap();
        }
    }

    let ids = h.telemetry.get_host_ids(false).await.unwrap();
    let roster = h.telemetry.compute_roster_at(&ids, now).await.unwrap();
    assert_eq!(roster.len(), 4);
    assert!(roster.online.contains_key("fresh"));
    assert!(roster.online.contains_key("edge"));
    assert!(roster.offline.contains_key("stale"));
    assert!(roster.offline.contains_key("silent"));
    for id in &ids {
        assert!(!(roster.online.contains_key(id) && roster.offline.contains_key(id)));
    }
}

#[tokio::test]
async fn maintenance_tick_enforces_retention() {
    let h = TestHarness::new();
    let now = unix_now();
    let horizon = now - 7 * 86_400;
    for ts in [horizon - 3_600, horizon - 1, horizon + 60, now - 60] {
        h.seed_sample("h1", ts, &json!({"Load": {"1m": 1}})).await.unwrap();
    }
    h.seed_info("h1", now - 60, &[]).await.unwrap();
    h.seed_name("h1", "db-1").await.unwrap();

    let report = h.run_tick().await;
    assert_eq!(report.hosts, 1);
    assert_eq!(report.rows_trimmed, 2);
    assert_eq!(report.refresh_failures, 0);
    assert!(h.stored_timestamps("h1").iter().all(|ts| *ts >= horizon));

    // le tick a chauffé le cache : lecture sans store
    h.store.clear_calls();
    h.telemetry.get_host_info("h1", false).await.unwrap();
    h.telemetry.get_display_names(false).await.unwrap();
    assert_eq!(h.store.count_op(StoreOp::HashGetAll), 0);
}

#[tokio::test]
async fn maintenance_tick_survives_store_outage() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();
    h.seed_sample("h2", 100, &json!({"Load": {"1m": 1}})).await.unwrap();

    h.store.set_failing(true);
    let report = h.run_tick().await;
    assert!(report.host_ids_error.is_some());

    h.store.set_failing(false);
    let report = h.run_tick().await;
    assert!(report.host_ids_error.is_none());
    assert_eq!(report.hosts, 2);
    assert_eq!(h.health.get_health(&h.telemetry).ticks, 2);
}

#[tokio::test]
async fn maintenance_tick_contains_per_host_failures() {
    let h = TestHarness::new();
    let now = unix_now();
    for host in ["h1", "h2"] {
        h.seed_sample(host, now - 60, &json!({"Load": {"1m": 1}})).await.unwrap();
        h.seed_info(host, now - 60, &[]).await.unwrap();
    }
    let h1 = h.keys().collection("h1");
    h.store.fail_key(StoreOp::RangeByScore, &h1);
    h.store.fail_key(StoreOp::RemoveRangeByScore, &h1);

    let report = h.run_tick().await;
    assert!(report.host_ids_error.is_none());
    assert_eq!(report.hosts, 2);
    assert_eq!(report.refresh_failures, 1);
    assert_eq!(report.trim_failures, 1);
    assert_eq!(report.series_refreshed, 1);
    assert_eq!(report.info_refreshed, 2);

    // h2 a été rafraîchi malgré la panne de h1
    h.store.clear_calls();
    h.telemetry.get_series("h2", false, None).await.unwrap();
    assert_eq!(h.series_reads("h2"), 0);
    assert_eq!(h.telemetry.cache_stats().series_entries, 1);

    let health = h.health.get_health(&h.telemetry);
    assert_eq!(health.refresh_failures, 1);
    assert_eq!(health.trim_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_inflight_reads_leaves_cache_empty() {
    let h = TestHarness::new();
    h.seed_sample("h1", 100, &json!({"Load": {"1m": 1}})).await.unwrap();
    h.seed_info("h1", 100, &[]).await.unwrap();
    h.store.set_delay(Some(Duration::from_secs(2)));

    let telemetry = h.telemetry.clone();
    let series = tokio::spawn(async move { telemetry.get_series("h1", false, None).await });
    let telemetry = h.telemetry.clone();
    let info = tokio::spawn(async move { telemetry.get_host_info("h1", false).await });

    tokio::time::sleep(Duration::from_millis(500)).await;
    h.telemetry.shutdown();

    assert!(matches!(series.await.unwrap(), Err(KernelError::CacheUnavailable)));
    assert!(matches!(info.await.unwrap(), Err(KernelError::CacheUnavailable)));
    assert!(!h.telemetry.is_open());
    assert_eq!(h.telemetry.cache_stats(), CacheStats::default());
}

#[tokio::test]
async fn ingest_drops_cached_series_even_if_registration_fails() {
    let h = TestHarness::new();
    let now = unix_now();
    let first = SnapshotBuilder::new().load(1.0, 1.0, 1.0).to_bytes().unwrap();
    h.telemetry.ingest("h1", now - 20, &first, HashMap::new()).await.unwrap();
    assert_eq!(h.telemetry.get_series("h1", false, None).await.unwrap().len(), 1);

    h.store.fail_key(StoreOp::HashSet, &h.keys().hashes());
    let second = SnapshotBuilder::new().load(2.0, 2.0, 2.0).to_bytes().unwrap();
    let err = h.telemetry.ingest("h1", now - 10, &second, HashMap::new()).await.unwrap_err();
    assert!(matches!(err, KernelError::Store(_)));

    // le sample est stocké, la série en cache ne doit plus être servie
    assert_eq!(h.telemetry.get_series("h1", false, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn ingest_invalidates_cached_series() {
    let h = TestHarness::new();
    let now = unix_now();
    h.telemetry
        .ingest("h1", now - 20, &SnapshotBuilder::new().load(1.0, 1.0, 1.0).to_bytes().unwrap(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(h.telemetry.get_series("h1", false, None).await.unwrap().len(), 1);

    h.telemetry
        .ingest("h1", now - 10, &SnapshotBuilder::new().load(2.0, 2.0, 2.0).to_bytes().unwrap(), HashMap::new())
        .await
        .unwrap();
    assert_eq!(h.telemetry.get_series("h1", false, None).await.unwrap().len(), 2);
    assert_eq!(h.store.count(StoreOp::AddScored, &h.keys().collection("h1")), 2);
}

#[tokio::test]
async fn file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let now = chrono::Utc::now().timestamp();

    {
        let store = Arc::new(FileStore::open(&path).await.unwrap());
        let svc = TelemetryService::new(store, StoreKeys::default(), ServiceSettings::default());
        let info = HashMap::from([("platform".to_string(), "linux".to_string())]);
        svc.ingest("h1", now - 5, &SnapshotBuilder::new().memory("1G", "0B").to_bytes().unwrap(), info)
            .await
            .unwrap();
        svc.shutdown();
    }

    let store = Arc::new(FileStore::open(&path).await.unwrap());
    let range = store
        .range_by_score(&StoreKeys::default().collection("h1"), ScoreBound::NegInf, ScoreBound::PosInf)
        .await
        .unwrap();
    assert_eq!(range.len(), 1);

    let svc = TelemetryService::new(store, StoreKeys::default(), ServiceSettings::default());
    let detail = svc.get_host_detail("h1").await.unwrap();
    assert_eq!(detail.info.get("platform").map(String::as_str), Some("linux"));
    assert_eq!(detail.latest_timestamp, Some(now - 5));
}
