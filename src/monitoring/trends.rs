// Trend detection over the most recent samples of each metric kind
// Compares short-window means against the warning thresholds, which makes it
// more sensitive than single-sample critical alerting

use super::alerts::{Alert, AlertCategory, AlertLevel};
use super::store::{cutoff_before, MetricStore};
use super::thresholds::Thresholds;
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Trend analysis window settings
#[derive(Debug, Clone, Copy)]
pub struct TrendSettings {
    /// Number of most recent records averaged per kind
    pub sample_size: usize,
    /// Only records newer than this are considered
    pub window: Duration,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            sample_size: 10,
            window: Duration::minutes(5),
        }
    }
}

pub struct TrendAnalyzer {
    settings: TrendSettings,
}

impl TrendAnalyzer {
    pub fn new(settings: TrendSettings) -> Self {
        Self { settings }
    }

    /// Id of the trend alert for `category` on tick `tick`
    pub fn trend_alert_id(category: AlertCategory, tick: u64, tick_at: DateTime<Utc>) -> String {
        format!("trend:{}:{}:{}", category, tick, tick_at.timestamp_millis())
    }

    /// Run one analysis pass.
    ///
    /// Kinds with fewer than `sample_size` records in the window are skipped.
    pub fn analyze(
        &self,
        store: &MetricStore,
        thresholds: &Thresholds,
        tick: u64,
        tick_at: DateTime<Utc>,
    ) -> Vec<Alert> {
        let since = Some(cutoff_before(tick_at, self.settings.window));
        let n = self.settings.sample_size.max(1);
        let mut alerts = Vec::new();

        let accuracy = store.accuracy_since(since);
        if accuracy.len() >= n {
            let avg = mean(accuracy.iter().rev().take(n).map(|m| m.accuracy_m));
            if let Some(mean) = avg.filter(|m| *m > thresholds.accuracy_warning_m) {
                alerts.push(self.trend_alert(
                    AlertCategory::LocationAccuracy,
                    "Location accuracy degrading",
                    format!(
                        "Mean accuracy over the last {} fixes is {:.1}m (warning at {:.1}m)",
                        n, mean, thresholds.accuracy_warning_m
                    ),
                    mean,
                    thresholds.accuracy_warning_m,
                    tick,
                    tick_at,
                ));
            }
        } else {
            debug!(kind = "accuracy", samples = accuracy.len(), "Not enough samples for trend analysis");
        }

        let performance = store.performance_since(since);
        if performance.len() >= n {
            let avg = mean(performance.iter().rev().take(n).map(|m| m.latency_ms));
            if let Some(mean) = avg.filter(|m| *m > thresholds.latency_warning_ms) {
                alerts.push(self.trend_alert(
                    AlertCategory::ServicePerformance,
                    "Service latency trending up",
                    format!(
                        "Mean latency over the last {} requests is {:.0}ms (warning at {:.0}ms)",
                        n, mean, thresholds.latency_warning_ms
                    ),
                    mean,
                    thresholds.latency_warning_ms,
                    tick,
                    tick_at,
                ));
            }
        } else {
            debug!(kind = "performance", samples = performance.len(), "Not enough samples for trend analysis");
        }

        let experience = store.experience_since(since);
        if experience.len() >= n {
            let avg = mean(experience.iter().rev().take(n).filter_map(|m| m.satisfaction));
            if let Some(mean) = avg.filter(|m| *m < thresholds.satisfaction_warning) {
                alerts.push(self.trend_alert(
                    AlertCategory::UserExperience,
                    "User satisfaction trending down",
                    format!(
                        "Mean satisfaction over the last {} actions is {:.2} (warning below {:.2})",
                        n, mean, thresholds.satisfaction_warning
                    ),
                    mean,
                    thresholds.satisfaction_warning,
                    tick,
                    tick_at,
                ));
            }
        } else {
            debug!(kind = "experience", samples = experience.len(), "Not enough samples for trend analysis");
        }

        alerts
    }

    #[allow(clippy::too_many_arguments)]
    fn trend_alert(
        &self,
        category: AlertCategory,
        title: &str,
        message: String,
        mean: f64,
        threshold: f64,
        tick: u64,
        tick_at: DateTime<Utc>,
    ) -> Alert {
        Alert::new(
            Self::trend_alert_id(category, tick, tick_at),
            AlertLevel::Warning,
            category,
            title,
            message,
            tick_at,
        )
        .with_metadata("trend", true)
        .with_metadata("mean", mean)
        .with_metadata("threshold", threshold)
        .with_metadata("sample_size", self.settings.sample_size)
        .with_metadata("tick", tick)
    }
}

/// Arithmetic mean, `None` for an empty sequence
pub fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::{
        ExperienceMetric, ExperienceSample, PerformanceMetric, PerformanceSample, ResourceUsage,
    };

    fn record_latency(store: &MetricStore, latency_ms: f64, at: DateTime<Utc>) {
        store.append_performance(
            PerformanceMetric::from_sample(
                PerformanceSample::new("geo", "/route", latency_ms, 200),
                ResourceUsage::default(),
                at,
            )
            .unwrap(),
        );
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean([1.0, 2.0, 3.0].into_iter()), Some(2.0));
        assert_eq!(mean(std::iter::empty::<f64>()), None);
    }

    #[test]
    fn test_latency_trend_alert() {
        let store = MetricStore::new(100);
        let now = Utc::now();
        for _ in 0..10 {
            record_latency(&store, 2500.0, now);
        }

        let analyzer = TrendAnalyzer::new(TrendSettings::default());
        let alerts = analyzer.analyze(&store, &Thresholds::default(), 1, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::ServicePerformance);
        assert_eq!(alerts[0].level, AlertLevel::Warning);

        let again = analyzer.analyze(&store, &Thresholds::default(), 2, now);
        assert_ne!(alerts[0].id, again[0].id);
    }

    #[test]
    fn test_too_few_samples_is_noop() {
        let store = MetricStore::new(100);
        let now = Utc::now();
        for _ in 0..9 {
            record_latency(&store, 9000.0, now);
        }
        let alerts = TrendAnalyzer::new(TrendSettings::default()).analyze(&store, &Thresholds::default(), 1, now);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_only_recent_sample_counts() {
        let store = MetricStore::new(100);
        let now = Utc::now();
        for _ in 0..10 {
            record_latency(&store, 9000.0, now);
        }
        for _ in 0..10 {
            record_latency(&store, 100.0, now);
        }
        let alerts = TrendAnalyzer::new(TrendSettings::default()).analyze(&store, &Thresholds::default(), 1, now);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_records_outside_window_ignored() {
        let store = MetricStore::new(100);
        let now = Utc::now();
        for _ in 0..10 {
            record_latency(&store, 9000.0, now - Duration::hours(1));
        }
        let alerts = TrendAnalyzer::new(TrendSettings::default()).analyze(&store, &Thresholds::default(), 1, now);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_satisfaction_trend() {
        let store = MetricStore::new(100);
        let now = Utc::now();
        for _ in 0..10 {
            store.append_experience(
                ExperienceMetric::from_sample(
                    ExperienceSample::new("u", "s", "search", true, 300.0).satisfaction(0.75),
                    now,
                )
                .unwrap(),
            );
        }
        let alerts = TrendAnalyzer::new(TrendSettings::default()).analyze(&store, &Thresholds::default(), 7, now);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::UserExperience);
        assert!(alerts[0].id.starts_with("trend:user_experience:7:"));
    }
}
