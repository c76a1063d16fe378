// Metrics exporters and persistence sinks
// Prometheus text rendering, HTTP push and JSON file snapshots

use super::dashboard::DashboardSnapshot;
use super::metrics::MetricKind;
use super::{EngineSnapshot, EngineStats, MetricsExporter, PersistenceSink};
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Prefix shared by every exported metric name
pub const METRIC_PREFIX: &str = "location_monitor_";

/// Export statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportStats {
    pub total_exports: u64,
    pub successful_exports: u64,
    pub failed_exports: u64,
    /// Average export time (milliseconds)
    pub avg_export_time: f64,
    pub last_export: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ExportStats {
    fn record(&mut self, started: Instant, outcome: &Result<()>) {
        let elapsed = started.elapsed().as_millis() as f64;
        self.total_exports += 1;
        self.avg_export_time = if self.total_exports == 1 {
            elapsed
        } else {
            (self.avg_export_time + elapsed) / 2.0
        };
        match outcome {
            Ok(()) => {
                self.successful_exports += 1;
                self.last_export = Some(Utc::now());
                self.last_error = None;
            }
            Err(e) => {
                self.failed_exports += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Prometheus metric family
#[derive(Debug, Clone)]
pub struct PrometheusMetric {
    pub name: String,
    pub help: String,
    pub metric_type: &'static str,
    pub samples: Vec<PrometheusSample>,
}

/// Prometheus sample
#[derive(Debug, Clone)]
pub struct PrometheusSample {
    pub labels: Vec<(&'static str, String)>,
    pub value: f64,
}

impl PrometheusMetric {
    fn gauge(name: &str, help: &str) -> Self {
        Self {
            name: format!("{}{}", METRIC_PREFIX, name),
            help: help.to_string(),
            metric_type: "gauge",
            samples: Vec::new(),
        }
    }

    fn counter(name: &str, help: &str) -> Self {
        Self {
            metric_type: "counter",
            ..Self::gauge(name, help)
        }
    }

    fn sample(mut self, value: f64) -> Self {
        self.samples.push(PrometheusSample {
            labels: Vec::new(),
            value,
        });
        self
    }

    fn labelled(mut self, label: &'static str, key: &str, value: f64) -> Self {
        self.samples.push(PrometheusSample {
            labels: vec![(label, key.to_string())],
            value,
        });
        self
    }

    /// Gauge with a single sample, omitted entirely when the value is unknown
    fn optional(self, value: Option<f64>) -> Option<Self> {
        value.map(|v| self.sample(v))
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Build the metric families for a dashboard snapshot and engine counters
pub fn collect_metrics(snapshot: &DashboardSnapshot, stats: &EngineStats) -> Vec<PrometheusMetric> {
    let mut records_total = PrometheusMetric::counter("records_total", "Records ingested per kind");
    let mut buffer_len = PrometheusMetric::gauge("buffer_len", "Records currently retained per kind");
    for kind in MetricKind::ALL {
        records_total = records_total.labelled("kind", kind.as_str(), snapshot.store.total(kind) as f64);
        buffer_len = buffer_len.labelled("kind", kind.as_str(), snapshot.store.len(kind) as f64);
    }

    let mut accuracy_tier =
        PrometheusMetric::gauge("accuracy_tier", "Accuracy records per tier in the dashboard window");
    for (tier, count) in &snapshot.accuracy.tier_distribution {
        accuracy_tier = accuracy_tier.labelled("tier", tier, *count as f64);
    }

    let mut unresolved = PrometheusMetric::gauge("unresolved_alerts", "Unresolved alerts per level");
    for (level, count) in &snapshot.unresolved_alerts {
        unresolved = unresolved.labelled("level", level, *count as f64);
    }

    let mut metrics = vec![records_total, buffer_len, accuracy_tier];
    metrics.extend(
        [
            PrometheusMetric::gauge("mean_latency_ms", "Mean service latency in the dashboard window")
                .optional(snapshot.performance.mean_latency_ms),
            PrometheusMetric::gauge("error_rate", "Fraction of failed service requests")
                .optional(snapshot.performance.error_rate),
            PrometheusMetric::gauge("cache_hit_ratio", "Mean cache hit ratio")
                .optional(snapshot.performance.mean_cache_hit_ratio),
            PrometheusMetric::gauge("success_rate", "Fraction of successful user actions")
                .optional(snapshot.experience.success_rate),
            PrometheusMetric::gauge("mean_satisfaction", "Mean user satisfaction score")
                .optional(snapshot.experience.mean_satisfaction),
        ]
        .into_iter()
        .flatten(),
    );
    metrics.push(unresolved);
    metrics.push(
        PrometheusMetric::gauge("pending_recommendations", "Recommendations awaiting action")
            .sample(snapshot.pending_recommendations as f64),
    );
    metrics.push(
        PrometheusMetric::counter("ticks_total", "Scheduler ticks executed").sample(stats.ticks_total as f64),
    );
    metrics.push(
        PrometheusMetric::counter("tick_failures_total", "Scheduler ticks with at least one failed stage")
            .sample(stats.tick_failures_total as f64),
    );
    metrics
}

/// Format metric families as Prometheus text exposition
pub fn format_prometheus_text(metrics: &[PrometheusMetric]) -> String {
    let mut output = String::new();

    for metric in metrics {
        let _ = writeln!(output, "# HELP {} {}", metric.name, metric.help);
        let _ = writeln!(output, "# TYPE {} {}", metric.name, metric.metric_type);

        for sample in &metric.samples {
            let labels_str = if sample.labels.is_empty() {
                String::new()
            } else {
                let labels: Vec<String> = sample
                    .labels
                    .iter()
                    .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
                    .collect();
                format!("{{{}}}", labels.join(","))
            };
            let _ = writeln!(output, "{}{} {}", metric.name, labels_str, sample.value);
        }
    }

    output
}

/// Keeps the most recent exposition text for a pull-based scraper
pub struct PrometheusExporter {
    latest: Arc<RwLock<Option<String>>>,
    stats: Arc<RwLock<ExportStats>>,
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self {
            latest: Arc::new(RwLock::new(None)),
            stats: Arc::new(RwLock::new(ExportStats::default())),
        }
    }

    /// Text published by the last export, if any
    pub async fn latest(&self) -> Option<String> {
        self.latest.read().await.clone()
    }

    pub async fn stats(&self) -> ExportStats {
        self.stats.read().await.clone()
    }
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetricsExporter for PrometheusExporter {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn export(&self, _snapshot: &DashboardSnapshot, prometheus_text: &str) -> Result<()> {
        let started = Instant::now();
        *self.latest.write().await = Some(prometheus_text.to_string());
        self.stats.write().await.record(started, &Ok(()));
        debug!(bytes = prometheus_text.len(), "Published Prometheus exposition");
        Ok(())
    }
}

/// Pushes dashboard snapshots as JSON to an HTTP endpoint
pub struct HttpExporter {
    endpoint_url: String,
    client: reqwest::Client,
    stats: Arc<RwLock<ExportStats>>,
}

impl HttpExporter {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint_url: endpoint_url.into(),
            client,
            stats: Arc::new(RwLock::new(ExportStats::default())),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint_url
    }

    pub async fn stats(&self) -> ExportStats {
        self.stats.read().await.clone()
    }

    async fn post(&self, snapshot: &DashboardSnapshot) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .json(snapshot)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::export(
                "http",
                format!("{} responded with status {}", self.endpoint_url, response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricsExporter for HttpExporter {
    fn name(&self) -> &str {
        "http"
    }

    async fn export(&self, snapshot: &DashboardSnapshot, _prometheus_text: &str) -> Result<()> {
        let started = Instant::now();
        let outcome = self.post(snapshot).await;
        self.stats.write().await.record(started, &outcome);
        if outcome.is_ok() {
            debug!(endpoint = %self.endpoint_url, "Exported dashboard snapshot");
        }
        outcome
    }
}

/// Writes the engine snapshot to a JSON file, replacing it atomically
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back a snapshot written by [`PersistenceSink::persist`]
    pub async fn load(&self) -> Result<EngineSnapshot> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl PersistenceSink for JsonFilePersistence {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn persist(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MonitorError::persistence("json_file", format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &json).await.map_err(|e| {
            MonitorError::persistence("json_file", format!("cannot write {}: {}", temp.display(), e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            MonitorError::persistence("json_file", format!("cannot replace {}: {}", self.path.display(), e))
        })?;

        debug!(path = %self.path.display(), bytes = json.len(), "Persisted engine snapshot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::dashboard::{AccuracySummary, ExperienceSummary, PerformanceSummary};
    use crate::monitoring::store::StoreStats;
    use std::collections::BTreeMap;

    fn snapshot() -> DashboardSnapshot {
        let mut tiers = BTreeMap::new();
        tiers.insert("high".to_string(), 3);
        tiers.insert("low".to_string(), 1);
        let mut unresolved = BTreeMap::new();
        unresolved.insert("critical".to_string(), 2);
        unresolved.insert("warning".to_string(), 0);

        DashboardSnapshot {
            generated_at: Utc::now(),
            window_secs: 3600,
            accuracy: AccuracySummary {
                samples: 4,
                tier_distribution: tiers,
                mean_accuracy_m: Some(20.0),
                mean_confidence: Some(0.9),
            },
            performance: PerformanceSummary {
                samples: 2,
                mean_latency_ms: Some(250.0),
                error_rate: Some(0.5),
                mean_cache_hit_ratio: None,
            },
            experience: ExperienceSummary::default(),
            unresolved_alerts: unresolved,
            pending_recommendations: 1,
            recommendations: Vec::new(),
            store: StoreStats {
                accuracy_len: 4,
                accuracy_total: 9,
                ..StoreStats::default()
            },
        }
    }

    #[test]
    fn test_prometheus_text_format() {
        let stats = EngineStats {
            ticks_total: 5,
            tick_failures_total: 1,
            ..EngineStats::default()
        };
        let text = format_prometheus_text(&collect_metrics(&snapshot(), &stats));

        assert!(text.contains("# TYPE location_monitor_records_total counter"));
        assert!(text.contains("location_monitor_records_total{kind=\"accuracy\"} 9"));
        assert!(text.contains("location_monitor_buffer_len{kind=\"accuracy\"} 4"));
        assert!(text.contains("location_monitor_accuracy_tier{tier=\"high\"} 3"));
        assert!(text.contains("location_monitor_mean_latency_ms 250"));
        assert!(text.contains("location_monitor_error_rate 0.5"));
        assert!(text.contains("location_monitor_unresolved_alerts{level=\"critical\"} 2"));
        assert!(text.contains("location_monitor_ticks_total 5"));
        assert!(text.contains("location_monitor_tick_failures_total 1"));
        // Unknown aggregates are left out rather than reported as zero
        assert!(!text.contains("location_monitor_cache_hit_ratio"));
        assert!(!text.contains("location_monitor_success_rate"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[tokio::test]
    async fn test_prometheus_exporter_keeps_latest() {
        let exporter = PrometheusExporter::new();
        assert!(exporter.latest().await.is_none());

        exporter.export(&snapshot(), "first").await.unwrap();
        exporter.export(&snapshot(), "second").await.unwrap();
        assert_eq!(exporter.latest().await.as_deref(), Some("second"));
        assert_eq!(exporter.stats().await.successful_exports, 2);
    }

    #[tokio::test]
    async fn test_http_exporter_unreachable_endpoint_fails() {
        let exporter = HttpExporter::new("http://127.0.0.1:9/ingest", Duration::from_millis(500)).unwrap();
        let result = exporter.export(&snapshot(), "").await;
        assert!(result.is_err());
        let stats = exporter.stats().await;
        assert_eq!(stats.failed_exports, 1);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn test_json_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFilePersistence::new(dir.path().join("nested").join("snapshot.json"));

        let snapshot = EngineSnapshot {
            taken_at: Utc::now(),
            tick: 3,
            ..EngineSnapshot::default()
        };
        sink.persist(&snapshot).await.unwrap();

        let loaded = sink.load().await.unwrap();
        assert_eq!(loaded.tick, 3);
        assert!(!sink.temp_path().exists());
    }
}
