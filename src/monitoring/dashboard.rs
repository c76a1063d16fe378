// Read-only dashboard aggregation
// Current-window summaries across the metric store, alerts and recommendations

use super::alerts::AlertLevel;
use super::metrics::AccuracyTier;
use super::recommendations::OptimizationRecommendation;
use super::store::{cutoff_before, MetricStore, StoreStats};
use super::trends::mean;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccuracySummary {
    pub samples: usize,
    /// Record count per tier (`high`, `medium`, `low`)
    pub tier_distribution: BTreeMap<String, usize>,
    pub mean_accuracy_m: Option<f64>,
    pub mean_confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub samples: usize,
    pub mean_latency_ms: Option<f64>,
    pub error_rate: Option<f64>,
    pub mean_cache_hit_ratio: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceSummary {
    pub samples: usize,
    pub success_rate: Option<f64>,
    pub mean_satisfaction: Option<f64>,
}

/// Immutable point-in-time summary handed to external consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub window_secs: i64,
    pub accuracy: AccuracySummary,
    pub performance: PerformanceSummary,
    pub experience: ExperienceSummary,
    /// Unresolved alert count per level, every level present
    pub unresolved_alerts: BTreeMap<String, usize>,
    pub pending_recommendations: usize,
    /// Most recent pending recommendations, newest first
    pub recommendations: Vec<OptimizationRecommendation>,
    pub store: StoreStats,
}

impl DashboardSnapshot {
    pub fn unresolved_total(&self) -> usize {
        self.unresolved_alerts.values().sum()
    }
}

pub struct DashboardAggregator {
    window: Duration,
}

impl DashboardAggregator {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn aggregate(
        &self,
        store: &MetricStore,
        unresolved_alerts: &BTreeMap<AlertLevel, usize>,
        pending_recommendations: usize,
        recommendations: Vec<OptimizationRecommendation>,
        now: DateTime<Utc>,
    ) -> DashboardSnapshot {
        let since = Some(cutoff_before(now, self.window));

        DashboardSnapshot {
            generated_at: now,
            window_secs: self.window.num_seconds(),
            accuracy: Self::accuracy_summary(store, since),
            performance: Self::performance_summary(store, since),
            experience: Self::experience_summary(store, since),
            unresolved_alerts: unresolved_alerts
                .iter()
                .map(|(level, count)| (level.as_str().to_string(), *count))
                .collect(),
            pending_recommendations,
            recommendations,
            store: store.stats(),
        }
    }

    fn accuracy_summary(store: &MetricStore, since: Option<DateTime<Utc>>) -> AccuracySummary {
        let records = store.accuracy_since(since);
        let mut tier_distribution: BTreeMap<String, usize> =
            [AccuracyTier::High, AccuracyTier::Medium, AccuracyTier::Low]
                .iter()
                .map(|tier| (tier.as_str().to_string(), 0))
                .collect();
        for record in &records {
            *tier_distribution
                .entry(record.tier.as_str().to_string())
                .or_insert(0) += 1;
        }

        AccuracySummary {
            samples: records.len(),
            tier_distribution,
            mean_accuracy_m: mean(records.iter().map(|m| m.accuracy_m)),
            mean_confidence: mean(records.iter().map(|m| m.confidence)),
        }
    }

    fn performance_summary(store: &MetricStore, since: Option<DateTime<Utc>>) -> PerformanceSummary {
        let records = store.performance_since(since);
        PerformanceSummary {
            samples: records.len(),
            mean_latency_ms: mean(records.iter().map(|m| m.latency_ms)),
            error_rate: mean(records.iter().map(|m| if m.is_error() { 1.0 } else { 0.0 })),
            mean_cache_hit_ratio: mean(records.iter().map(|m| m.cache_hit_ratio)),
        }
    }

    fn experience_summary(store: &MetricStore, since: Option<DateTime<Utc>>) -> ExperienceSummary {
        let records = store.experience_since(since);
        ExperienceSummary {
            samples: records.len(),
            success_rate: mean(records.iter().map(|m| if m.success { 1.0 } else { 0.0 })),
            mean_satisfaction: mean(records.iter().filter_map(|m| m.satisfaction)),
        }
    }
}
