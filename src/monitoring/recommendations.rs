// Optimization recommendations derived from aggregate statistics
// Aggregates are compared against targets ("good" state), not alert thresholds

use super::store::MetricStore;
use super::thresholds::Thresholds;
use super::trends::mean;
use crate::utils::error::MonitorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = MonitorError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == s)
                    .ok_or_else(|| MonitorError::invalid_input(format!(
                        concat!("unknown ", stringify!($name), ": {}"),
                        s
                    )))
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    Accuracy,
    Performance,
    UserExperience,
    Cost,
}

string_enum!(RecommendationCategory {
    Accuracy => "accuracy",
    Performance => "performance",
    UserExperience => "user_experience",
    Cost => "cost",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    InProgress,
    Completed,
    Dismissed,
}

impl RecommendationStatus {
    /// Completed or dismissed; no further operator action expected
    pub fn is_closed(self) -> bool {
        matches!(self, RecommendationStatus::Completed | RecommendationStatus::Dismissed)
    }
}

string_enum!(RecommendationStatus {
    Pending => "pending",
    InProgress => "in_progress",
    Completed => "completed",
    Dismissed => "dismissed",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationPriority {
    Low,
    Medium,
    High,
}

string_enum!(RecommendationPriority {
    Low => "low",
    Medium => "medium",
    High => "high",
});

impl RecommendationPriority {
    /// Band an improvement percentage, ignoring float noise below 1e-6
    pub fn from_improvement(improvement_pct: f64) -> Self {
        let improvement_pct = (improvement_pct * 1e6).round() / 1e6;
        if improvement_pct >= 50.0 {
            RecommendationPriority::High
        } else if improvement_pct >= 20.0 {
            RecommendationPriority::Medium
        } else {
            RecommendationPriority::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffortEstimate {
    Low,
    Medium,
    High,
}

string_enum!(EffortEstimate {
    Low => "low",
    Medium => "medium",
    High => "high",
});

/// Whether smaller or larger aggregate values are better
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    /// Does `current` miss `target` by more than the relative `margin`?
    pub fn misses_target(&self, current: f64, target: f64, margin: f64) -> bool {
        match self {
            Direction::Minimize => current > target * (1.0 + margin),
            Direction::Maximize => current < target * (1.0 - margin),
        }
    }

    /// Percentage gained by reaching `target` from `current`
    pub fn improvement_pct(&self, current: f64, target: f64) -> f64 {
        let pct = match self {
            Direction::Minimize if current > 0.0 => (current - target) / current * 100.0,
            Direction::Maximize if target > 0.0 => (target - current) / target * 100.0,
            _ => 0.0,
        };
        pct.max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub id: String,
    pub category: RecommendationCategory,
    /// Aggregate this recommendation is about, e.g. `mean_latency_ms`
    pub metric: String,
    pub priority: RecommendationPriority,
    pub title: String,
    pub description: String,
    pub current_value: f64,
    pub target_value: f64,
    pub potential_improvement_pct: f64,
    pub effort: EffortEstimate,
    pub created_at: DateTime<Utc>,
    pub status: RecommendationStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OptimizationRecommendation {
    /// Deduplication key: category + metric name
    pub fn key(&self) -> String {
        format!("{}:{}", self.category, self.metric)
    }
}

/// One aggregate the engine watches
struct Objective {
    category: RecommendationCategory,
    metric: &'static str,
    direction: Direction,
    effort: EffortEstimate,
    title: &'static str,
    advice: &'static str,
}

const MEAN_ACCURACY: Objective = Objective {
    category: RecommendationCategory::Accuracy,
    metric: "mean_accuracy_m",
    direction: Direction::Minimize,
    effort: EffortEstimate::Medium,
    title: "Improve location accuracy",
    advice: "Prefer GNSS or fused positioning where available and tighten the fix acceptance radius",
};

const MEAN_LATENCY: Objective = Objective {
    category: RecommendationCategory::Performance,
    metric: "mean_latency_ms",
    direction: Direction::Minimize,
    effort: EffortEstimate::Medium,
    title: "Reduce service latency",
    advice: "Profile slow endpoints, add spatial indexes and batch upstream lookups",
};

const CACHE_HIT_RATIO: Objective = Objective {
    category: RecommendationCategory::Cost,
    metric: "mean_cache_hit_ratio",
    direction: Direction::Maximize,
    effort: EffortEstimate::Low,
    title: "Raise cache hit ratio",
    advice: "Widen geohash cache keys and extend TTLs for stable lookups to cut upstream calls",
};

const SUCCESS_RATE: Objective = Objective {
    category: RecommendationCategory::UserExperience,
    metric: "success_rate",
    direction: Direction::Maximize,
    effort: EffortEstimate::High,
    title: "Increase user action success rate",
    advice: "Review failing user flows and add graceful fallbacks for location lookups",
};

const MEAN_SATISFACTION: Objective = Objective {
    category: RecommendationCategory::UserExperience,
    metric: "mean_satisfaction",
    direction: Direction::Maximize,
    effort: EffortEstimate::Medium,
    title: "Improve user satisfaction",
    advice: "Correlate low ratings with slow or inaccurate responses and address the worst flows first",
};

/// Aggregation window settings
#[derive(Debug, Clone, Copy)]
pub struct RecommendationSettings {
    /// Minimum records of a kind before it is aggregated
    pub min_samples: usize,
    /// Most recent records aggregated per kind
    pub sample_size: usize,
}

impl Default for RecommendationSettings {
    fn default() -> Self {
        Self {
            min_samples: 50,
            sample_size: 1000,
        }
    }
}

pub struct RecommendationEngine {
    settings: RecommendationSettings,
}

impl RecommendationEngine {
    pub fn new(settings: RecommendationSettings) -> Self {
        Self { settings }
    }

    /// Compute candidate recommendations from the current history.
    ///
    /// Never mutates metric data; the caller decides which candidates are new.
    pub fn analyze(
        &self,
        store: &MetricStore,
        thresholds: &Thresholds,
        now: DateTime<Utc>,
    ) -> Vec<OptimizationRecommendation> {
        let limit = self.settings.sample_size.max(self.settings.min_samples);
        let mut aggregates: Vec<(&Objective, f64, f64)> = Vec::new();

        let accuracy = store.accuracy_recent(limit);
        if accuracy.len() >= self.settings.min_samples {
            if let Some(v) = mean(accuracy.iter().map(|m| m.accuracy_m)) {
                aggregates.push((&MEAN_ACCURACY, v, thresholds.target_accuracy_m));
            }
        }

        let performance = store.performance_recent(limit);
        if performance.len() >= self.settings.min_samples {
            if let Some(v) = mean(performance.iter().map(|m| m.latency_ms)) {
                aggregates.push((&MEAN_LATENCY, v, thresholds.target_latency_ms));
            }
            if let Some(v) = mean(performance.iter().map(|m| m.cache_hit_ratio)) {
                aggregates.push((&CACHE_HIT_RATIO, v, thresholds.target_cache_hit_ratio));
            }
        }

        let experience = store.experience_recent(limit);
        if experience.len() >= self.settings.min_samples {
            let successes = experience.iter().filter(|m| m.success).count();
            let rate = successes as f64 / experience.len() as f64;
            aggregates.push((&SUCCESS_RATE, rate, thresholds.target_success_rate));
            if let Some(v) = mean(experience.iter().filter_map(|m| m.satisfaction)) {
                aggregates.push((&MEAN_SATISFACTION, v, thresholds.target_satisfaction));
            }
        }

        aggregates
            .into_iter()
            .filter(|(objective, current, target)| {
                let miss = objective
                    .direction
                    .misses_target(*current, *target, thresholds.recommendation_margin);
                debug!(metric = objective.metric, current, target, miss, "Evaluated aggregate");
                miss
            })
            .map(|(objective, current, target)| build(objective, current, target, now))
            .collect()
    }
}

fn build(
    objective: &Objective,
    current: f64,
    target: f64,
    now: DateTime<Utc>,
) -> OptimizationRecommendation {
    let improvement = objective.direction.improvement_pct(current, target);
    OptimizationRecommendation {
        id: format!("rec-{}", Uuid::new_v4()),
        category: objective.category,
        metric: objective.metric.to_string(),
        priority: RecommendationPriority::from_improvement(improvement),
        title: objective.title.to_string(),
        description: format!(
            "{} is {:.2} against a target of {:.2}. {}.",
            objective.metric, current, target, objective.advice
        ),
        current_value: current,
        target_value: target,
        potential_improvement_pct: improvement,
        effort: objective.effort,
        created_at: now,
        status: RecommendationStatus::Pending,
        updated_at: None,
    }
}

/// Filter for [`RecommendationBook::list`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationQuery {
    pub status: Option<RecommendationStatus>,
    pub category: Option<RecommendationCategory>,
}

impl RecommendationQuery {
    pub fn status(mut self, status: RecommendationStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn category(mut self, category: RecommendationCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn matches(&self, rec: &OptimizationRecommendation) -> bool {
        self.status.map_or(true, |s| rec.status == s)
            && self.category.map_or(true, |c| rec.category == c)
    }
}

/// Recommendation list with operator-driven status
#[derive(Debug)]
pub struct RecommendationBook {
    items: Vec<OptimizationRecommendation>,
    capacity: usize,
}

impl RecommendationBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Add unless a pending recommendation with the same key exists
    pub fn offer(&mut self, rec: OptimizationRecommendation) -> bool {
        let key = rec.key();
        let duplicate = self
            .items
            .iter()
            .any(|r| r.status == RecommendationStatus::Pending && r.key() == key);
        if duplicate {
            return false;
        }
        info!(
            recommendation_id = %rec.id,
            category = %rec.category,
            priority = %rec.priority,
            "New optimization recommendation: {}",
            rec.title
        );
        self.items.push(rec);
        self.enforce_capacity();
        true
    }

    /// Oldest closed recommendations go first, then the oldest of any status
    fn enforce_capacity(&mut self) {
        while self.items.len() > self.capacity {
            let victim = self
                .items
                .iter()
                .position(|r| r.status.is_closed())
                .unwrap_or(0);
            self.items.remove(victim);
        }
    }

    /// Drop closed recommendations last touched at or before `cutoff`
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.items.len();
        self.items
            .retain(|r| !r.status.is_closed() || r.updated_at.unwrap_or(r.created_at) > cutoff);
        before - self.items.len()
    }

    pub fn update_status(
        &mut self,
        id: &str,
        status: RecommendationStatus,
        at: DateTime<Utc>,
    ) -> bool {
        match self.items.iter_mut().find(|r| r.id == id) {
            Some(rec) => {
                rec.status = status;
                rec.updated_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn list(&self, query: &RecommendationQuery) -> Vec<OptimizationRecommendation> {
        self.items.iter().filter(|r| query.matches(r)).cloned().collect()
    }

    /// Newest pending recommendations first
    pub fn recent_pending(&self, limit: usize) -> Vec<OptimizationRecommendation> {
        let mut pending: Vec<_> = self
            .items
            .iter()
            .filter(|r| r.status == RecommendationStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending.truncate(limit);
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.items
            .iter()
            .filter(|r| r.status == RecommendationStatus::Pending)
            .count()
    }

    pub fn all(&self) -> Vec<OptimizationRecommendation> {
        self.items.clone()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
