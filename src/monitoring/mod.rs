// Production monitoring engine for the location service
// Concurrent metric ingestion, inline alerting, periodic trend and recommendation analysis

use crate::config::MonitorConfig;
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub mod alerts;
pub mod cache;
pub mod dashboard;
pub mod exporters;
pub mod geo;
pub mod metrics;
pub mod recommendations;
pub mod resource_tracker;
pub mod scheduler;
pub mod store;
pub mod thresholds;
pub mod trends;


use alerts::{log_alert, Alert, AlertBook, AlertEvaluator, AlertQuery};
use dashboard::{DashboardAggregator, DashboardSnapshot};
use metrics::{
    AccuracyMetric, AccuracySample, ExperienceMetric, ExperienceSample, MetricKind, MetricRecord,
    PerformanceMetric, PerformanceSample, ResourceUsage,
};
use recommendations::{
    OptimizationRecommendation, RecommendationBook, RecommendationEngine, RecommendationQuery,
    RecommendationSettings, RecommendationStatus,
};
use resource_tracker::{ResourceProbe, ResourceTracker};
use scheduler::{
    CleanupReport, MonitoringScheduler, SchedulerSettings, StageFailure, TickReport, TickRunner,
    TickStage,
};
use store::{cutoff_before, lock, MetricStore};
use thresholds::{SharedThresholds, Thresholds};
use trends::{TrendAnalyzer, TrendSettings};

/// Subject used for alerts raised from the scheduler's own resource samples
const PROCESS_SUBJECT: &str = "process";

/// Destination for full engine snapshots, called once per tick
#[async_trait::async_trait]
pub trait PersistenceSink: Send + Sync {
    fn name(&self) -> &str;

    async fn persist(&self, snapshot: &EngineSnapshot) -> Result<()>;
}

/// Destination for dashboard aggregates, called once per tick
#[async_trait::async_trait]
pub trait MetricsExporter: Send + Sync {
    fn name(&self) -> &str;

    /// `prometheus_text` is the exposition rendered from the same snapshot
    async fn export(&self, snapshot: &DashboardSnapshot, prometheus_text: &str) -> Result<()>;
}

/// Ephemeral store for recent dashboards readable by other processes
#[async_trait::async_trait]
pub trait SnapshotCache: Send + Sync {
    fn name(&self) -> &str;

    async fn push(&self, snapshot: &DashboardSnapshot, ttl: Duration) -> Result<()>;

    async fn fetch(&self) -> Result<Option<DashboardSnapshot>>;
}

/// Full copy of engine state handed to persistence sinks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub tick: u64,
    pub accuracy: Vec<AccuracyMetric>,
    pub performance: Vec<PerformanceMetric>,
    pub experience: Vec<ExperienceMetric>,
    pub alerts: Vec<Alert>,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub thresholds: BTreeMap<String, f64>,
}

/// Engine counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub running: bool,
    pub ticks_total: u64,
    pub tick_failures_total: u64,
    pub alerts_raised: u64,
    pub recommendations_raised: u64,
    pub rejected_records: u64,
}

/// Shared state behind every engine handle and the scheduler task
struct EngineCore {
    config: MonitorConfig,
    store: MetricStore,
    thresholds: SharedThresholds,
    alerts: Mutex<AlertBook>,
    recommendations: Mutex<RecommendationBook>,
    trends: TrendAnalyzer,
    recommender: RecommendationEngine,
    dashboard: DashboardAggregator,
    probe: Option<Arc<dyn ResourceProbe>>,
    latest_usage: Mutex<ResourceUsage>,
    persistence: Vec<Arc<dyn PersistenceSink>>,
    exporters: Vec<Arc<dyn MetricsExporter>>,
    cache: Option<Arc<dyn SnapshotCache>>,
    ticks: AtomicU64,
    tick_failures: AtomicU64,
    alerts_raised: AtomicU64,
    recommendations_raised: AtomicU64,
    rejected_records: AtomicU64,
}

/// Monitoring engine handle; clones share the same state
#[derive(Clone)]
pub struct MonitoringEngine {
    core: Arc<EngineCore>,
    scheduler: Arc<Mutex<Option<MonitoringScheduler>>>,
    /// Serializes `stop()` so every caller waits for the same shutdown
    stopping: Arc<tokio::sync::Mutex<()>>,
}

/// Builder for [`MonitoringEngine`] with injected collaborators
pub struct MonitoringEngineBuilder {
    config: MonitorConfig,
    persistence: Vec<Arc<dyn PersistenceSink>>,
    exporters: Vec<Arc<dyn MetricsExporter>>,
    cache: Option<Arc<dyn SnapshotCache>>,
    probe: Option<Arc<dyn ResourceProbe>>,
}

impl MonitoringEngineBuilder {
    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence.push(sink);
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn MetricsExporter>) -> Self {
        self.exporters.push(exporter);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn SnapshotCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the sysinfo-backed process probe
    pub fn with_resource_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Add the sinks described by the configuration
    pub fn with_configured_sinks(mut self) -> Result<Self> {
        let timeout = Duration::from_secs(self.config.sink_timeout_secs);

        if let Some(path) = &self.config.persistence.json_path {
            self.persistence
                .push(Arc::new(exporters::JsonFilePersistence::new(path.clone())));
        }
        if self.config.export.enable_prometheus {
            self.exporters
                .push(Arc::new(exporters::PrometheusExporter::new()));
        }
        if let Some(endpoint) = &self.config.export.http_endpoint {
            self.exporters
                .push(Arc::new(exporters::HttpExporter::new(endpoint.clone(), timeout)?));
        }
        if let Some(url) = &self.config.cache.redis_url {
            self.cache = Some(Arc::new(cache::RedisSnapshotCache::new(
                url,
                &self.config.cache.key_prefix,
            )?));
        }
        Ok(self)
    }

    pub fn build(self) -> Result<MonitoringEngine> {
        self.config.validate()?;
        let config = self.config;

        let probe = match self.probe {
            Some(probe) => Some(probe),
            None if config.enable_resource_sampling => match ResourceTracker::new() {
                Ok(tracker) => Some(Arc::new(tracker) as Arc<dyn ResourceProbe>),
                Err(e) => {
                    warn!(error = %e, "Process resource sampling unavailable");
                    None
                }
            },
            None => None,
        };

        let core = EngineCore {
            store: MetricStore::new(config.buffer_capacity),
            thresholds: SharedThresholds::new(config.thresholds.clone()),
            alerts: Mutex::new(AlertBook::new(config.alert_capacity)),
            recommendations: Mutex::new(RecommendationBook::new(config.recommendation_capacity)),
            trends: TrendAnalyzer::new(TrendSettings {
                sample_size: config.trend_sample_size,
                window: chrono::Duration::seconds(config.trend_window_secs as i64),
            }),
            recommender: RecommendationEngine::new(RecommendationSettings {
                min_samples: config.recommendation_min_samples,
                sample_size: config.recommendation_sample_size,
            }),
            dashboard: DashboardAggregator::new(chrono::Duration::seconds(
                config.dashboard_window_secs as i64,
            )),
            probe,
            latest_usage: Mutex::new(ResourceUsage::default()),
            persistence: self.persistence,
            exporters: self.exporters,
            cache: self.cache,
            ticks: AtomicU64::new(0),
            tick_failures: AtomicU64::new(0),
            alerts_raised: AtomicU64::new(0),
            recommendations_raised: AtomicU64::new(0),
            rejected_records: AtomicU64::new(0),
            config,
        };

        info!(
            buffer_capacity = core.config.buffer_capacity,
            persistence_sinks = core.persistence.len(),
            exporters = core.exporters.len(),
            cache = core.cache.as_ref().map(|c| c.name()).unwrap_or("none"),
            "Monitoring engine initialized"
        );

        Ok(MonitoringEngine {
            core: Arc::new(core),
            scheduler: Arc::new(Mutex::new(None)),
            stopping: Arc::new(tokio::sync::Mutex::new(())),
        })
    }
}

impl MonitoringEngine {
    /// Engine with the sinks described by `config`
    pub fn new(config: MonitorConfig) -> Result<Self> {
        Self::builder(config).with_configured_sinks()?.build()
    }

    /// Engine without any sinks unless added on the builder
    pub fn builder(config: MonitorConfig) -> MonitoringEngineBuilder {
        MonitoringEngineBuilder {
            config,
            persistence: Vec::new(),
            exporters: Vec::new(),
            cache: None,
            probe: None,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.core.config
    }

    /// Record a location fix; returns the alerts it raised
    pub fn record_location_accuracy(&self, sample: AccuracySample) -> Result<Vec<Alert>> {
        let metric = self
            .core
            .reject_on_error(AccuracyMetric::from_sample(sample, Utc::now()))?;
        Ok(self.core.ingest(MetricRecord::Accuracy(metric)))
    }

    /// Record a service call, stamped with the latest process resource sample
    pub fn record_service_performance(&self, sample: PerformanceSample) -> Result<Vec<Alert>> {
        let usage = *lock(&self.core.latest_usage);
        let metric = self
            .core
            .reject_on_error(PerformanceMetric::from_sample(sample, usage, Utc::now()))?;
        Ok(self.core.ingest(MetricRecord::Performance(metric)))
    }

    /// Record a user action
    pub fn record_user_experience(&self, sample: ExperienceSample) -> Result<Vec<Alert>> {
        let metric = self
            .core
            .reject_on_error(ExperienceMetric::from_sample(sample, Utc::now()))?;
        Ok(self.core.ingest(MetricRecord::Experience(metric)))
    }

    pub fn snapshot(&self, kind: MetricKind, since: Option<DateTime<Utc>>) -> Vec<MetricRecord> {
        self.core.store.snapshot(kind, since)
    }

    pub fn dashboard(&self) -> DashboardSnapshot {
        self.core.dashboard_snapshot(Utc::now())
    }

    /// Dashboard most recently pushed to the external cache, if one is configured
    pub async fn cached_dashboard(&self) -> Result<Option<DashboardSnapshot>> {
        match &self.core.cache {
            Some(cache) => cache.fetch().await,
            None => Ok(None),
        }
    }

    pub fn list_alerts(&self, query: &AlertQuery) -> Vec<Alert> {
        lock(&self.core.alerts).list(query)
    }

    /// Mark an alert resolved; `false` when the id is unknown
    pub fn resolve_alert(&self, id: &str) -> bool {
        let resolved = lock(&self.core.alerts).resolve(id, Utc::now());
        if resolved {
            info!(alert_id = %id, "Alert resolved");
        } else {
            debug!(alert_id = %id, "Resolve requested for unknown alert");
        }
        resolved
    }

    pub fn list_recommendations(&self, query: &RecommendationQuery) -> Vec<OptimizationRecommendation> {
        lock(&self.core.recommendations).list(query)
    }

    /// Change a recommendation's status; `false` when the id is unknown
    pub fn update_recommendation_status(&self, id: &str, status: RecommendationStatus) -> bool {
        let updated = lock(&self.core.recommendations).update_status(id, status, Utc::now());
        if updated {
            info!(recommendation_id = %id, status = %status, "Recommendation status updated");
        }
        updated
    }

    pub fn thresholds(&self) -> BTreeMap<String, f64> {
        self.core.thresholds.load().to_map()
    }

    /// Replace named thresholds; all-or-nothing, takes effect on the next evaluation
    pub fn update_thresholds(&self, updates: &BTreeMap<String, f64>) -> Result<()> {
        self.core.thresholds.update(updates)
    }

    /// Start the background scheduler; a no-op when already running
    pub fn start(&self) -> Result<()> {
        let mut slot = lock(&self.scheduler);
        if slot.as_ref().map_or(false, |s| !s.is_finished()) {
            debug!("Monitoring scheduler already running");
            return Ok(());
        }

        let settings = SchedulerSettings {
            interval: Duration::from_secs(self.core.config.tick_interval_secs),
            max_backoff: Duration::from_secs(self.core.config.max_backoff_secs),
        };
        *slot = Some(MonitoringScheduler::spawn(self.core.clone(), settings)?);
        Ok(())
    }

    /// Stop the scheduler, waiting for an in-flight tick; idempotent.
    ///
    /// Concurrent callers all return only after the shutdown completes.
    pub async fn stop(&self) {
        let _gate = self.stopping.lock().await;
        let scheduler = lock(&self.scheduler).take();
        if let Some(scheduler) = scheduler {
            scheduler.shutdown().await;
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.scheduler)
            .as_ref()
            .map_or(false, |s| !s.is_finished())
    }

    /// Run one full scheduler tick now
    pub async fn run_tick(&self) -> TickReport {
        self.core.run_tick().await
    }

    /// Drop metrics, alerts and closed recommendations older than `retention_days`
    pub fn cleanup(&self, retention_days: u32) -> CleanupReport {
        self.core.cleanup(retention_days, Utc::now())
    }

    /// Prometheus text exposition of the current dashboard
    pub fn prometheus_text(&self) -> String {
        let snapshot = self.dashboard();
        self.core.prometheus_text(&snapshot, self.is_running())
    }

    pub fn stats(&self) -> EngineStats {
        self.core.stats(self.is_running())
    }

    /// Full copy of engine state, as handed to persistence sinks
    pub fn engine_snapshot(&self) -> EngineSnapshot {
        self.core.engine_snapshot(self.core.ticks.load(Ordering::Relaxed), Utc::now())
    }
}

impl EngineCore {
    fn reject_on_error<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.rejected_records.fetch_add(1, Ordering::Relaxed);
            warn!(error = %e, "Rejected malformed metric");
        }
        result
    }

    /// Evaluate against the current thresholds, append, and raise alerts
    fn ingest(&self, record: MetricRecord) -> Vec<Alert> {
        let thresholds = self.thresholds.load();
        let alerts = AlertEvaluator::evaluate(&record, &thresholds);
        self.store.append(record);
        self.raise(alerts)
    }

    /// Insert alerts not already retained; returns the ones inserted
    fn raise(&self, alerts: Vec<Alert>) -> Vec<Alert> {
        if alerts.is_empty() {
            return alerts;
        }

        let inserted: Vec<Alert> = {
            let mut book = lock(&self.alerts);
            alerts.into_iter().filter(|a| book.insert(a.clone())).collect()
        };
        for alert in &inserted {
            log_alert(alert);
        }
        self.alerts_raised
            .fetch_add(inserted.len() as u64, Ordering::Relaxed);
        inserted
    }

    fn dashboard_snapshot(&self, now: DateTime<Utc>) -> DashboardSnapshot {
        let unresolved = lock(&self.alerts).unresolved_by_level();
        let (pending, recent) = {
            let book = lock(&self.recommendations);
            (
                book.pending_count(),
                book.recent_pending(self.config.dashboard_recommendation_limit),
            )
        };
        self.dashboard
            .aggregate(&self.store, &unresolved, pending, recent, now)
    }

    fn engine_snapshot(&self, tick: u64, now: DateTime<Utc>) -> EngineSnapshot {
        EngineSnapshot {
            taken_at: now,
            tick,
            accuracy: self.store.accuracy_since(None),
            performance: self.store.performance_since(None),
            experience: self.store.experience_since(None),
            alerts: lock(&self.alerts).all(),
            recommendations: lock(&self.recommendations).all(),
            thresholds: self.thresholds.load().to_map(),
        }
    }

    fn stats(&self, running: bool) -> EngineStats {
        EngineStats {
            running,
            ticks_total: self.ticks.load(Ordering::Relaxed),
            tick_failures_total: self.tick_failures.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            recommendations_raised: self.recommendations_raised.load(Ordering::Relaxed),
            rejected_records: self.rejected_records.load(Ordering::Relaxed),
        }
    }

    fn prometheus_text(&self, snapshot: &DashboardSnapshot, running: bool) -> String {
        exporters::format_prometheus_text(&exporters::collect_metrics(snapshot, &self.stats(running)))
    }

    fn cleanup(&self, retention_days: u32, now: DateTime<Utc>) -> CleanupReport {
        let cutoff = cutoff_before(now, chrono::Duration::days(i64::from(retention_days)));
        let metrics_removed = self.store.evict_before(cutoff);
        let alerts_removed = lock(&self.alerts).evict_before(cutoff);
        let recommendations_removed = lock(&self.recommendations).evict_before(cutoff);
        let report = CleanupReport {
            cutoff,
            metrics_removed,
            alerts_removed,
            recommendations_removed,
        };
        if report.removed() > 0 {
            info!(
                retention_days,
                metrics_removed,
                alerts_removed,
                recommendations_removed,
                "Pruned expired monitoring data"
            );
        }
        report
    }

    fn sample_resources(&self, report: &mut TickReport, thresholds: &Thresholds) {
        let Some(probe) = &self.probe else {
            return;
        };
        match probe.sample() {
            Ok(usage) => {
                *lock(&self.latest_usage) = usage;
                let alerts = AlertEvaluator::evaluate_resources(
                    PROCESS_SUBJECT,
                    usage,
                    report.started_at,
                    thresholds,
                );
                report.resource_alerts = self.raise(alerts).len();
            }
            Err(e) => record_failure(report, TickStage::ResourceSampling, None, &e),
        }
    }

    fn offer_recommendations(&self, candidates: Vec<OptimizationRecommendation>) -> usize {
        if candidates.is_empty() {
            return 0;
        }
        let added = {
            let mut book = lock(&self.recommendations);
            candidates.into_iter().filter(|r| book.offer(r.clone())).count()
        };
        self.recommendations_raised
            .fetch_add(added as u64, Ordering::Relaxed);
        added
    }

    /// Run `fut` under the sink deadline
    async fn guarded<F>(&self, stage: TickStage, target: &str, fut: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        let seconds = self.config.sink_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::timeout(format!("{} {}", stage, target), seconds)),
        }
    }

    /// Persistence, export and cache calls; no shared lock is held here
    async fn flush_sinks(&self, report: &mut TickReport) {
        if !self.persistence.is_empty() {
            let snapshot = self.engine_snapshot(report.tick, report.started_at);
            for sink in &self.persistence {
                if let Err(e) = self
                    .guarded(TickStage::Persistence, sink.name(), sink.persist(&snapshot))
                    .await
                {
                    record_failure(report, TickStage::Persistence, Some(sink.name()), &e);
                }
            }
        }

        if self.exporters.is_empty() && self.cache.is_none() {
            return;
        }

        let dashboard = self.dashboard_snapshot(report.started_at);
        if !self.exporters.is_empty() {
            let text = self.prometheus_text(&dashboard, true);
            for exporter in &self.exporters {
                if let Err(e) = self
                    .guarded(TickStage::Export, exporter.name(), exporter.export(&dashboard, &text))
                    .await
                {
                    record_failure(report, TickStage::Export, Some(exporter.name()), &e);
                }
            }
        }

        if let Some(cache) = &self.cache {
            let ttl = Duration::from_secs(self.config.cache.ttl_secs);
            if let Err(e) = self
                .guarded(TickStage::Cache, cache.name(), cache.push(&dashboard, ttl))
                .await
            {
                record_failure(report, TickStage::Cache, Some(cache.name()), &e);
            }
        }
    }
}

fn record_failure(report: &mut TickReport, stage: TickStage, target: Option<&str>, e: &MonitorError) {
    error!(
        tick = report.tick,
        tick_at = %report.started_at,
        stage = %stage,
        target = target.unwrap_or("-"),
        error = %e,
        "Monitoring tick stage failed"
    );
    report.failures.push(StageFailure::new(stage, target, e));
}

#[async_trait::async_trait]
impl TickRunner for EngineCore {
    async fn run_tick(&self) -> TickReport {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = TickReport::new(tick, Utc::now());
        debug!(tick, tick_at = %report.started_at, "Running monitoring tick");

        let thresholds = self.thresholds.load();

        self.sample_resources(&mut report, &thresholds);

        let trend_alerts = self
            .trends
            .analyze(&self.store, &thresholds, tick, report.started_at);
        report.trend_alerts = self.raise(trend_alerts).len();

        let candidates = self
            .recommender
            .analyze(&self.store, &thresholds, report.started_at);
        report.new_recommendations = self.offer_recommendations(candidates);

        self.flush_sinks(&mut report).await;

        report.cleanup = Some(self.cleanup(self.config.retention_days, report.started_at));

        if !report.is_clean() {
            self.tick_failures.fetch_add(1, Ordering::Relaxed);
        }
        report
    }
}
