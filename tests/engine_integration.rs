//! Engine Integration Tests
//!
//! Exercises the monitoring engine through its public API only: concurrent
//! producers, the scheduler lifecycle, sink failures and JSON persistence.

use location_monitor::monitoring::exporters::JsonFilePersistence;
use location_monitor::{
    AccuracySample, AlertQuery, EngineSnapshot, ExperienceSample, GeoPoint, MetricKind,
    MonitorConfig, MonitorError, MonitoringEngine, PerformanceSample, PersistenceSink,
    RecommendationQuery, Result,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn quiet_config() -> MonitorConfig {
    MonitorConfig {
        enable_resource_sampling: false,
        ..MonitorConfig::default()
    }
}

struct UnreachableStore;

#[async_trait::async_trait]
impl PersistenceSink for UnreachableStore {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn persist(&self, _snapshot: &EngineSnapshot) -> Result<()> {
        Err(MonitorError::persistence("unreachable", "connection refused"))
    }
}

#[test]
fn test_concurrent_producers_and_readers() {
    let engine = MonitoringEngine::builder(quiet_config().with_buffer_capacity(1_000))
        .build()
        .unwrap();

    let producers: Vec<_> = (0..8)
        .map(|worker| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..500 {
                    let sample = PerformanceSample::new(
                        "geocoder",
                        "/v1/geocode",
                        50.0 + (i % 100) as f64,
                        200,
                    )
                    .cache_hit_ratio(0.9);
                    engine.record_service_performance(sample).unwrap();

                    if i % 50 == 0 {
                        let expected = GeoPoint::new(48.8566, 2.3522);
                        engine
                            .record_location_accuracy(AccuracySample::new(
                                &format!("courier-{}", worker),
                                expected,
                                expected.offset_north(3.0),
                                "gps",
                            ))
                            .unwrap();
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = engine.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let dashboard = engine.dashboard();
                    assert!(dashboard.performance.samples <= 1_000);
                    let records = engine.snapshot(MetricKind::Performance, None);
                    assert!(records.len() <= 1_000);
                    engine.list_alerts(&AlertQuery::unresolved());
                }
            })
        })
        .collect();

    for handle in producers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    let dashboard = engine.dashboard();
    assert_eq!(dashboard.store.len(MetricKind::Performance), 1_000);
    assert_eq!(dashboard.store.total(MetricKind::Performance), 4_000);
    assert_eq!(dashboard.store.len(MetricKind::Accuracy), 80);
    assert!(engine.list_alerts(&AlertQuery::all()).is_empty());

    let report = tokio_test::block_on(engine.run_tick());
    assert!(report.is_clean());
    assert_eq!(engine.stats().ticks_total, 1);
}

#[tokio::test]
async fn test_start_stop_is_idempotent_and_prompt() {
    let config = MonitorConfig {
        max_backoff_secs: 3_600,
        ..quiet_config().with_tick_interval(3_600)
    };
    let engine = MonitoringEngine::builder(config).build().unwrap();

    engine.stop().await;
    engine.start().unwrap();
    engine.start().unwrap();
    assert!(engine.is_running());

    let started = Instant::now();
    engine.stop().await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!engine.is_running());
    assert_eq!(engine.stats().ticks_total, 0);

    engine.stop().await;
    engine.start().unwrap();
    assert!(engine.is_running());
    engine.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_sink_backs_off_without_blocking_ingestion() {
    let config = MonitorConfig {
        tick_interval_secs: 1,
        max_backoff_secs: 4,
        ..quiet_config()
    };
    let engine = MonitoringEngine::builder(config)
        .with_persistence(Arc::new(UnreachableStore))
        .build()
        .unwrap();
    engine.start().unwrap();

    let alerts = engine
        .record_user_experience(
            ExperienceSample::new("u-7", "s-1", "navigate", false, 900.0).satisfaction(0.4),
        )
        .unwrap();
    assert_eq!(alerts.len(), 1);

    // Ticks at 1s and 3s; the next one would be at 7s
    tokio::time::sleep(Duration::from_millis(4_500)).await;
    engine.stop().await;

    let stats = engine.stats();
    assert_eq!(stats.ticks_total, 2);
    assert_eq!(stats.tick_failures_total, 2);
    assert_eq!(engine.dashboard().experience.samples, 1);
}

#[tokio::test]
async fn test_json_persistence_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("state").join("engine.json");
    let sink = Arc::new(JsonFilePersistence::new(&path));

    let engine = MonitoringEngine::builder(quiet_config())
        .with_persistence(sink.clone())
        .build()
        .unwrap();

    let expected = GeoPoint::new(35.6762, 139.6503);
    engine
        .record_location_accuracy(AccuracySample::new(
            "kiosk-3",
            expected,
            expected.offset_north(320.0),
            "wifi",
        ))
        .unwrap();
    engine
        .record_service_performance(PerformanceSample::new("routing", "/v1/eta", 180.0, 200))
        .unwrap();

    let report = engine.run_tick().await;
    assert!(report.is_clean(), "{:?}", report.failures);
    assert!(path.exists());
    assert!(!temp_dir.path().join("state").join("engine.json.tmp").exists());

    let loaded = sink.load().await.unwrap();
    assert_eq!(loaded.tick, 1);
    assert_eq!(loaded.accuracy.len(), 1);
    assert_eq!(loaded.performance.len(), 1);
    assert!(loaded.experience.is_empty());
    assert_eq!(loaded.alerts.len(), engine.list_alerts(&AlertQuery::all()).len());
    assert_eq!(loaded.thresholds, engine.thresholds());
    assert!(loaded.recommendations.is_empty());
}

#[test]
fn test_threshold_update_is_all_or_nothing() {
    let engine = MonitoringEngine::builder(quiet_config()).build().unwrap();
    let before = engine.thresholds();

    let mut updates = BTreeMap::new();
    updates.insert("latency_warning_ms".to_string(), 50.0);
    updates.insert("not_a_threshold".to_string(), 1.0);
    assert!(engine.update_thresholds(&updates).is_err());
    assert_eq!(engine.thresholds(), before);

    updates.remove("not_a_threshold");
    engine.update_thresholds(&updates).unwrap();
    assert_eq!(engine.thresholds()["latency_warning_ms"], 50.0);

    let alerts = engine
        .record_service_performance(PerformanceSample::new("places", "/v1/nearby", 75.0, 200))
        .unwrap();
    assert_eq!(alerts.len(), 1);
}

#[test]
fn test_recommendations_need_enough_samples() {
    let engine = MonitoringEngine::builder(quiet_config()).build().unwrap();
    for _ in 0..10 {
        engine
            .record_service_performance(PerformanceSample::new("geocoder", "/v1/reverse", 4_000.0, 200))
            .unwrap();
    }

    tokio_test::block_on(engine.run_tick());
    assert!(engine
        .list_recommendations(&RecommendationQuery::default())
        .is_empty());
}
