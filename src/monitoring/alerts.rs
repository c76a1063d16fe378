// Alert model, single-sample threshold evaluation and the retained alert list

use super::metrics::{
    AccuracyMetric, ExperienceMetric, MetricRecord, PerformanceMetric, ResourceUsage,
};
use super::store::RingBuffer;
use super::thresholds::Thresholds;
use crate::utils::error::MonitorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{error, info, warn};

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Error,
}

impl AlertLevel {
    pub const ALL: [AlertLevel; 4] = [
        AlertLevel::Info,
        AlertLevel::Warning,
        AlertLevel::Critical,
        AlertLevel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Critical => "critical",
            AlertLevel::Error => "error",
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertLevel {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| MonitorError::invalid_input(format!("unknown alert level: {}", s)))
    }
}

/// What an alert is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    LocationAccuracy,
    LocationConfidence,
    ServicePerformance,
    SystemResources,
    UserExperience,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 5] = [
        AlertCategory::LocationAccuracy,
        AlertCategory::LocationConfidence,
        AlertCategory::ServicePerformance,
        AlertCategory::SystemResources,
        AlertCategory::UserExperience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::LocationAccuracy => "location_accuracy",
            AlertCategory::LocationConfidence => "location_confidence",
            AlertCategory::ServicePerformance => "service_performance",
            AlertCategory::SystemResources => "system_resources",
            AlertCategory::UserExperience => "user_experience",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCategory {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == s)
            .ok_or_else(|| MonitorError::invalid_input(format!("unknown alert category: {}", s)))
    }
}

/// Alert data structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Category, rule, subject and time bucket; equal ids are the same occurrence
    pub id: String,
    pub level: AlertLevel,
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: BTreeMap<String, Value>,
}

impl Alert {
    pub fn new(
        id: String,
        level: AlertLevel,
        category: AlertCategory,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            level,
            category,
            title: title.into(),
            message: message.into(),
            created_at,
            resolved: false,
            resolved_at: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Id for a single-sample alert, bucketed to the record's second
pub fn sample_alert_id(
    category: AlertCategory,
    rule: &str,
    subject: &str,
    at: DateTime<Utc>,
) -> String {
    format!("{}:{}:{}:{}", category, rule, subject, at.timestamp())
}

/// Log an alert at a severity matching its level
pub fn log_alert(alert: &Alert) {
    match alert.level {
        AlertLevel::Critical | AlertLevel::Error => {
            error!(alert_id = %alert.id, category = %alert.category, "{}: {}", alert.title, alert.message)
        }
        AlertLevel::Warning => {
            warn!(alert_id = %alert.id, category = %alert.category, "{}: {}", alert.title, alert.message)
        }
        AlertLevel::Info => {
            info!(alert_id = %alert.id, category = %alert.category, "{}: {}", alert.title, alert.message)
        }
    }
}

/// Single-record threshold rules.
///
/// Evaluation is exhaustive: every rule is checked for every record and a
/// record may produce several alerts.
pub struct AlertEvaluator;

impl AlertEvaluator {
    pub fn evaluate(record: &MetricRecord, thresholds: &Thresholds) -> Vec<Alert> {
        match record {
            MetricRecord::Accuracy(m) => Self::evaluate_accuracy(m, thresholds),
            MetricRecord::Performance(m) => Self::evaluate_performance(m, thresholds),
            MetricRecord::Experience(m) => Self::evaluate_experience(m, thresholds),
        }
    }

    pub fn evaluate_accuracy(metric: &AccuracyMetric, thresholds: &Thresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let category = AlertCategory::LocationAccuracy;

        let distance_level = if metric.accuracy_m > thresholds.accuracy_critical_m {
            Some((AlertLevel::Critical, thresholds.accuracy_critical_m))
        } else if metric.accuracy_m > thresholds.accuracy_warning_m {
            Some((AlertLevel::Warning, thresholds.accuracy_warning_m))
        } else {
            None
        };

        if let Some((level, threshold)) = distance_level {
            let rule = format!("distance_{}", level);
            alerts.push(
                Alert::new(
                    sample_alert_id(category, &rule, &metric.subject_id, metric.timestamp),
                    level,
                    category,
                    format!("Poor location accuracy for {}", metric.subject_id),
                    format!(
                        "Position off by {:.1}m (threshold {:.1}m, method {})",
                        metric.accuracy_m, threshold, metric.method
                    ),
                    metric.timestamp,
                )
                .with_metadata("subject_id", metric.subject_id.clone())
                .with_metadata("accuracy_m", metric.accuracy_m)
                .with_metadata("threshold", threshold)
                .with_metadata("method", metric.method.clone()),
            );
        }

        if metric.confidence < thresholds.confidence_critical {
            let category = AlertCategory::LocationConfidence;
            alerts.push(
                Alert::new(
                    sample_alert_id(category, "confidence", &metric.subject_id, metric.timestamp),
                    AlertLevel::Critical,
                    category,
                    format!("Low location confidence for {}", metric.subject_id),
                    format!(
                        "Confidence {:.2} below {:.2} (method {})",
                        metric.confidence, thresholds.confidence_critical, metric.method
                    ),
                    metric.timestamp,
                )
                .with_metadata("subject_id", metric.subject_id.clone())
                .with_metadata("confidence", metric.confidence)
                .with_metadata("threshold", thresholds.confidence_critical),
            );
        }

        alerts
    }

    pub fn evaluate_performance(metric: &PerformanceMetric, thresholds: &Thresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let subject = format!("{}{}", metric.service, metric.endpoint);
        let category = AlertCategory::ServicePerformance;

        let latency_level = if metric.latency_ms > thresholds.latency_critical_ms {
            Some((AlertLevel::Critical, thresholds.latency_critical_ms))
        } else if metric.latency_ms > thresholds.latency_warning_ms {
            Some((AlertLevel::Warning, thresholds.latency_warning_ms))
        } else {
            None
        };

        if let Some((level, threshold)) = latency_level {
            let rule = format!("latency_{}", level);
            alerts.push(
                Alert::new(
                    sample_alert_id(category, &rule, &subject, metric.timestamp),
                    level,
                    category,
                    format!("Slow response from {}", metric.service),
                    format!(
                        "{} {} took {:.0}ms (threshold {:.0}ms)",
                        metric.service, metric.endpoint, metric.latency_ms, threshold
                    ),
                    metric.timestamp,
                )
                .with_metadata("service", metric.service.clone())
                .with_metadata("endpoint", metric.endpoint.clone())
                .with_metadata("latency_ms", metric.latency_ms)
                .with_metadata("threshold", threshold),
            );
        }

        alerts.extend(Self::evaluate_resources(
            &subject,
            ResourceUsage {
                cpu_pct: metric.cpu_pct,
                memory_pct: metric.memory_pct,
            },
            metric.timestamp,
            thresholds,
        ));

        alerts
    }

    /// CPU and memory are checked independently, one alert per resource
    pub fn evaluate_resources(
        subject: &str,
        usage: ResourceUsage,
        at: DateTime<Utc>,
        thresholds: &Thresholds,
    ) -> Vec<Alert> {
        let category = AlertCategory::SystemResources;
        let checks = [
            ("cpu", usage.cpu_pct, thresholds.cpu_critical_pct),
            ("memory", usage.memory_pct, thresholds.memory_critical_pct),
        ];

        checks
            .into_iter()
            .filter(|(_, value, threshold)| value > threshold)
            .map(|(resource, value, threshold)| {
                Alert::new(
                    sample_alert_id(category, resource, subject, at),
                    AlertLevel::Critical,
                    category,
                    format!("High {} usage", resource),
                    format!(
                        "{} usage at {:.1}% exceeds {:.1}% ({})",
                        resource, value, threshold, subject
                    ),
                    at,
                )
                .with_metadata("resource", resource)
                .with_metadata("value", value)
                .with_metadata("threshold", threshold)
            })
            .collect()
    }

    pub fn evaluate_experience(metric: &ExperienceMetric, thresholds: &Thresholds) -> Vec<Alert> {
        let mut alerts = Vec::new();
        let category = AlertCategory::UserExperience;

        if let Some(satisfaction) = metric.satisfaction {
            if satisfaction < thresholds.satisfaction_critical {
                alerts.push(
                    Alert::new(
                        sample_alert_id(category, "satisfaction", &metric.user_id, metric.timestamp),
                        AlertLevel::Critical,
                        category,
                        "Low user satisfaction",
                        format!(
                            "User {} rated {} at {:.2} (threshold {:.2})",
                            metric.user_id, metric.action, satisfaction, thresholds.satisfaction_critical
                        ),
                        metric.timestamp,
                    )
                    .with_metadata("user_id", metric.user_id.clone())
                    .with_metadata("session_id", metric.session_id.clone())
                    .with_metadata("satisfaction", satisfaction)
                    .with_metadata("threshold", thresholds.satisfaction_critical),
                );
            }
        }

        if f64::from(metric.retries) > thresholds.retry_warning {
            alerts.push(
                Alert::new(
                    sample_alert_id(category, "retries", &metric.user_id, metric.timestamp),
                    AlertLevel::Warning,
                    category,
                    "High retry rate",
                    format!(
                        "User {} retried {} {} times",
                        metric.user_id, metric.action, metric.retries
                    ),
                    metric.timestamp,
                )
                .with_metadata("user_id", metric.user_id.clone())
                .with_metadata("session_id", metric.session_id.clone())
                .with_metadata("retries", metric.retries)
                .with_metadata("threshold", thresholds.retry_warning),
            );
        }

        alerts
    }
}

/// Filter for [`AlertBook::list`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertQuery {
    pub level: Option<AlertLevel>,
    pub category: Option<AlertCategory>,
    pub unresolved_only: bool,
}

impl AlertQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn unresolved() -> Self {
        Self {
            unresolved_only: true,
            ..Self::default()
        }
    }

    pub fn level(mut self, level: AlertLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn category(mut self, category: AlertCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.level.map_or(true, |level| alert.level == level)
            && self.category.map_or(true, |category| alert.category == category)
            && !(self.unresolved_only && alert.resolved)
    }
}

/// Retained alerts, oldest first, with id-based deduplication
#[derive(Debug)]
pub struct AlertBook {
    alerts: RingBuffer<Alert>,
    ids: HashSet<String>,
}

impl AlertBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            alerts: RingBuffer::new(capacity),
            ids: HashSet::new(),
        }
    }

    /// Insert unless an alert with the same id is already retained.
    ///
    /// A retained resolved alert is never re-opened by a later write. Ids are
    /// only remembered while retained: once an alert is evicted by capacity or
    /// retention, the same id is accepted again as a new alert.
    pub fn insert(&mut self, alert: Alert) -> bool {
        if !self.ids.insert(alert.id.clone()) {
            return false;
        }
        if let Some(evicted) = self.alerts.push(alert) {
            self.ids.remove(&evicted.id);
        }
        true
    }

    /// Mark an alert resolved; `false` if the id is unknown.
    ///
    /// Resolving twice keeps the first resolution time.
    pub fn resolve(&mut self, id: &str, at: DateTime<Utc>) -> bool {
        match self.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                if !alert.resolved {
                    alert.resolved = true;
                    alert.resolved_at = Some(at);
                }
                true
            }
            None => false,
        }
    }

    pub fn list(&self, query: &AlertQuery) -> Vec<Alert> {
        self.alerts.iter().filter(|a| query.matches(a)).cloned().collect()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.iter().cloned().collect()
    }

    pub fn unresolved_by_level(&self) -> BTreeMap<AlertLevel, usize> {
        let mut counts: BTreeMap<AlertLevel, usize> =
            AlertLevel::ALL.into_iter().map(|level| (level, 0)).collect();
        for alert in self.alerts.iter().filter(|a| !a.resolved) {
            *counts.entry(alert.level).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    /// Drop alerts created at or before `cutoff`, resolved or not
    pub fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let removed = self.alerts.retain(|a| a.created_at > cutoff);
        if removed > 0 {
            self.ids = self.alerts.iter().map(|a| a.id.clone()).collect();
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::geo::GeoPoint;
    use crate::monitoring::metrics::{AccuracySample, ExperienceSample, PerformanceSample};
    use chrono::Duration;

    fn accuracy(distance_m: f64, method: &str) -> AccuracyMetric {
        let expected = GeoPoint::new(51.5, -0.12);
        AccuracyMetric::from_sample(
            AccuracySample::new("courier-7", expected, expected.offset_north(distance_m), method),
            Utc::now(),
        )
        .unwrap()
    }

    fn performance(latency_ms: f64, cpu: f64, memory: f64) -> PerformanceMetric {
        PerformanceMetric::from_sample(
            PerformanceSample::new("geocoder", "/v1/geocode", latency_ms, 200),
            ResourceUsage {
                cpu_pct: cpu,
                memory_pct: memory,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_accuracy_critical_wins_over_warning() {
        let alerts = AlertEvaluator::evaluate_accuracy(&accuracy(250.0, "gps"), &Thresholds::default());
        let accuracy_alerts: Vec<_> = alerts
            .iter()
            .filter(|a| a.category == AlertCategory::LocationAccuracy)
            .collect();
        assert_eq!(accuracy_alerts.len(), 1);
        assert_eq!(accuracy_alerts[0].level, AlertLevel::Critical);
    }

    #[test]
    fn test_accuracy_warning_band() {
        let alerts = AlertEvaluator::evaluate_accuracy(&accuracy(80.0, "gps"), &Thresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }

    #[test]
    fn test_accurate_fix_is_quiet() {
        let alerts = AlertEvaluator::evaluate_accuracy(&accuracy(30.0, "gps"), &Thresholds::default());
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_low_confidence_is_separate_category() {
        // ip geolocation starts at 0.40 confidence
        let alerts = AlertEvaluator::evaluate_accuracy(&accuracy(5.0, "ip"), &Thresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].category, AlertCategory::LocationConfidence);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
    }

    #[test]
    fn test_latency_levels() {
        let t = Thresholds::default();
        assert!(AlertEvaluator::evaluate_performance(&performance(1500.0, 10.0, 10.0), &t).is_empty());

        let warning = AlertEvaluator::evaluate_performance(&performance(2500.0, 10.0, 10.0), &t);
        assert_eq!(warning.len(), 1);
        assert_eq!(warning[0].level, AlertLevel::Warning);

        let critical = AlertEvaluator::evaluate_performance(&performance(6000.0, 10.0, 10.0), &t);
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].level, AlertLevel::Critical);
    }

    #[test]
    fn test_resources_checked_independently() {
        let alerts =
            AlertEvaluator::evaluate_performance(&performance(6000.0, 97.0, 99.0), &Thresholds::default());
        assert_eq!(alerts.len(), 3);
        let resource_alerts = alerts
            .iter()
            .filter(|a| a.category == AlertCategory::SystemResources)
            .count();
        assert_eq!(resource_alerts, 2);
        let ids: HashSet<_> = alerts.iter().map(|a| a.id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_experience_rules_are_independent() {
        let metric = ExperienceMetric::from_sample(
            ExperienceSample::new("u-42", "s-1", "checkout", false, 9000.0)
                .satisfaction(0.5)
                .retries(5),
            Utc::now(),
        )
        .unwrap();
        let alerts = AlertEvaluator::evaluate_experience(&metric, &Thresholds::default());
        assert_eq!(alerts.len(), 2);
        assert!(alerts.iter().any(|a| a.level == AlertLevel::Critical));
        assert!(alerts.iter().any(|a| a.title == "High retry rate"));
    }

    #[test]
    fn test_retry_rule_without_satisfaction() {
        let metric = ExperienceMetric::from_sample(
            ExperienceSample::new("u-42", "s-1", "search", true, 100.0).retries(4),
            Utc::now(),
        )
        .unwrap();
        let alerts = AlertEvaluator::evaluate_experience(&metric, &Thresholds::default());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Warning);

        let three = ExperienceMetric::from_sample(
            ExperienceSample::new("u-42", "s-1", "search", true, 100.0).retries(3),
            Utc::now(),
        )
        .unwrap();
        assert!(AlertEvaluator::evaluate_experience(&three, &Thresholds::default()).is_empty());
    }

    #[test]
    fn test_book_dedups_and_never_reopens() {
        let mut book = AlertBook::new(10);
        let at = Utc::now();
        let alert = Alert::new(
            "service_performance:latency_warning:geo/x:1".to_string(),
            AlertLevel::Warning,
            AlertCategory::ServicePerformance,
            "t",
            "m",
            at,
        );

        assert!(book.insert(alert.clone()));
        assert!(!book.insert(alert.clone()));
        assert!(book.resolve(&alert.id, at));
        assert!(!book.insert(alert.clone()));

        let listed = book.list(&AlertQuery::all());
        assert_eq!(listed.len(), 1);
        assert!(listed[0].resolved);
        assert!(book.list(&AlertQuery::unresolved()).is_empty());
    }

    #[test]
    fn test_book_resolve_unknown() {
        let mut book = AlertBook::new(10);
        assert!(!book.resolve("missing", Utc::now()));
    }

    #[test]
    fn test_book_eviction_frees_ids() {
        let mut book = AlertBook::new(2);
        let at = Utc::now();
        for i in 0..3 {
            book.insert(Alert::new(
                format!("a{}", i),
                AlertLevel::Info,
                AlertCategory::UserExperience,
                "t",
                "m",
                at,
            ));
        }
        assert_eq!(book.len(), 2);
        assert!(book.insert(Alert::new(
            "a0".to_string(),
            AlertLevel::Info,
            AlertCategory::UserExperience,
            "t",
            "m",
            at,
        )));
    }

    #[test]
    fn test_book_evict_before_and_counts() {
        let mut book = AlertBook::new(10);
        let now = Utc::now();
        book.insert(Alert::new(
            "old".to_string(),
            AlertLevel::Critical,
            AlertCategory::LocationAccuracy,
            "t",
            "m",
            now - Duration::days(40),
        ));
        book.insert(Alert::new(
            "new".to_string(),
            AlertLevel::Warning,
            AlertCategory::LocationAccuracy,
            "t",
            "m",
            now,
        ));

        let counts = book.unresolved_by_level();
        assert_eq!(counts[&AlertLevel::Critical], 1);
        assert_eq!(counts[&AlertLevel::Warning], 1);
        assert_eq!(counts[&AlertLevel::Info], 0);

        assert_eq!(book.evict_before(now - Duration::days(30)), 1);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_query_parsing() {
        assert_eq!("critical".parse::<AlertLevel>().unwrap(), AlertLevel::Critical);
        assert_eq!(
            "service_performance".parse::<AlertCategory>().unwrap(),
            AlertCategory::ServicePerformance
        );
        assert!("fatal".parse::<AlertLevel>().is_err());
    }
}
