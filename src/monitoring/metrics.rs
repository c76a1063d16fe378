// Metric records for the three telemetry kinds
// Producers hand in samples; the engine stamps them and derives accuracy fields

use super::geo::GeoPoint;
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound (meters) of the `high` accuracy tier
pub const HIGH_TIER_MAX_M: f64 = 10.0;
/// Upper bound (meters) of the `medium` accuracy tier
pub const MEDIUM_TIER_MAX_M: f64 = 50.0;

/// The closed set of metric kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Accuracy,
    Performance,
    Experience,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::Accuracy,
        MetricKind::Performance,
        MetricKind::Experience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Accuracy => "accuracy",
            MetricKind::Performance => "performance",
            MetricKind::Experience => "experience",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accuracy tier derived from the accuracy distance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyTier {
    High,
    Medium,
    Low,
}

impl AccuracyTier {
    pub fn from_distance(distance_m: f64) -> Self {
        if distance_m <= HIGH_TIER_MAX_M {
            AccuracyTier::High
        } else if distance_m <= MEDIUM_TIER_MAX_M {
            AccuracyTier::Medium
        } else {
            AccuracyTier::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccuracyTier::High => "high",
            AccuracyTier::Medium => "medium",
            AccuracyTier::Low => "low",
        }
    }
}

/// Base confidence of a positioning method before distance is taken into account
pub fn method_confidence(method: &str) -> f64 {
    match method.to_ascii_lowercase().as_str() {
        "gps" | "gnss" => 0.95,
        "fused" => 0.90,
        "wifi" => 0.80,
        "cell" | "cellular" => 0.60,
        "ip" => 0.40,
        _ => 0.70,
    }
}

/// Confidence score in [0, 1] for a fix produced by `method` that landed `distance_m` off
pub fn derive_confidence(method: &str, distance_m: f64) -> f64 {
    let decay = 1000.0 / (1000.0 + distance_m.max(0.0));
    (method_confidence(method) * decay).clamp(0.0, 1.0)
}

fn check_non_negative(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(MonitorError::invalid_input(format!(
            "{} must be a finite non-negative number, got {}",
            field, value
        )))
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(MonitorError::invalid_input(format!(
            "{} must be within [0, 1], got {}",
            field, value
        )))
    }
}

/// Location accuracy sample as handed in by a producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracySample {
    pub subject_id: String,
    pub expected: GeoPoint,
    pub observed: GeoPoint,
    pub method: String,
    pub latency_ms: f64,
    pub feedback: Option<f64>,
}

impl AccuracySample {
    pub fn new(subject_id: &str, expected: GeoPoint, observed: GeoPoint, method: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            expected,
            observed,
            method: method.to_string(),
            latency_ms: 0.0,
            feedback: None,
        }
    }

    pub fn latency_ms(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn feedback(mut self, score: f64) -> Self {
        self.feedback = Some(score);
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.expected.validate()?;
        self.observed.validate()?;
        check_non_negative("latency_ms", self.latency_ms)?;
        if let Some(feedback) = self.feedback {
            if !feedback.is_finite() {
                return Err(MonitorError::invalid_input("feedback must be finite"));
            }
        }
        Ok(())
    }
}

/// Service performance sample as handed in by a producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub service: String,
    pub endpoint: String,
    pub latency_ms: f64,
    pub status_code: u16,
    pub error_kind: Option<String>,
    pub cache_hit_ratio: f64,
}

impl PerformanceSample {
    pub fn new(service: &str, endpoint: &str, latency_ms: f64, status_code: u16) -> Self {
        Self {
            service: service.to_string(),
            endpoint: endpoint.to_string(),
            latency_ms,
            status_code,
            error_kind: None,
            cache_hit_ratio: 0.0,
        }
    }

    pub fn error_kind(mut self, kind: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self
    }

    pub fn cache_hit_ratio(mut self, ratio: f64) -> Self {
        self.cache_hit_ratio = ratio;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_non_negative("latency_ms", self.latency_ms)?;
        check_unit_interval("cache_hit_ratio", self.cache_hit_ratio)
    }
}

/// User experience sample as handed in by a producer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceSample {
    pub user_id: String,
    pub session_id: String,
    pub action: String,
    pub success: bool,
    pub time_ms: f64,
    pub satisfaction: Option<f64>,
    pub error_message: Option<String>,
    pub retries: u32,
}

impl ExperienceSample {
    pub fn new(user_id: &str, session_id: &str, action: &str, success: bool, time_ms: f64) -> Self {
        Self {
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            action: action.to_string(),
            success,
            time_ms,
            satisfaction: None,
            error_message: None,
            retries: 0,
        }
    }

    pub fn satisfaction(mut self, score: f64) -> Self {
        self.satisfaction = Some(score);
        self
    }

    pub fn error_message(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_non_negative("time_ms", self.time_ms)?;
        if let Some(satisfaction) = self.satisfaction {
            check_unit_interval("satisfaction", satisfaction)?;
        }
        Ok(())
    }
}

/// Stored location accuracy record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetric {
    pub timestamp: DateTime<Utc>,
    pub subject_id: String,
    pub expected: GeoPoint,
    pub observed: GeoPoint,
    pub accuracy_m: f64,
    pub tier: AccuracyTier,
    pub method: String,
    pub confidence: f64,
    pub latency_ms: f64,
    pub feedback: Option<f64>,
}

impl AccuracyMetric {
    pub fn from_sample(sample: AccuracySample, timestamp: DateTime<Utc>) -> Result<Self> {
        sample.validate()?;
        let accuracy_m = sample.expected.distance_to(&sample.observed);
        Ok(Self {
            timestamp,
            confidence: derive_confidence(&sample.method, accuracy_m),
            tier: AccuracyTier::from_distance(accuracy_m),
            accuracy_m,
            subject_id: sample.subject_id,
            expected: sample.expected,
            observed: sample.observed,
            method: sample.method,
            latency_ms: sample.latency_ms,
            feedback: sample.feedback,
        })
    }
}

/// Process resource usage stamped onto performance records
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_pct: f64,
    pub memory_pct: f64,
}

/// Stored service performance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub endpoint: String,
    pub latency_ms: f64,
    pub status_code: u16,
    pub error_kind: Option<String>,
    pub cpu_pct: f64,
    pub memory_pct: f64,
    pub cache_hit_ratio: f64,
}

impl PerformanceMetric {
    pub fn from_sample(
        sample: PerformanceSample,
        resources: ResourceUsage,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        sample.validate()?;
        Ok(Self {
            timestamp,
            service: sample.service,
            endpoint: sample.endpoint,
            latency_ms: sample.latency_ms,
            status_code: sample.status_code,
            error_kind: sample.error_kind,
            cpu_pct: resources.cpu_pct,
            memory_pct: resources.memory_pct,
            cache_hit_ratio: sample.cache_hit_ratio,
        })
    }

    /// Failed request: HTTP error status or an explicit error kind
    pub fn is_error(&self) -> bool {
        self.status_code >= 400 || self.error_kind.is_some()
    }
}

/// Stored user experience record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperienceMetric {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub session_id: String,
    pub action: String,
    pub success: bool,
    pub time_ms: f64,
    pub satisfaction: Option<f64>,
    pub error_message: Option<String>,
    pub retries: u32,
}

impl ExperienceMetric {
    pub fn from_sample(sample: ExperienceSample, timestamp: DateTime<Utc>) -> Result<Self> {
        sample.validate()?;
        Ok(Self {
            timestamp,
            user_id: sample.user_id,
            session_id: sample.session_id,
            action: sample.action,
            success: sample.success,
            time_ms: sample.time_ms,
            satisfaction: sample.satisfaction,
            error_message: sample.error_message,
            retries: sample.retries,
        })
    }
}

/// One recorded metric, tagged by kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricRecord {
    Accuracy(AccuracyMetric),
    Performance(PerformanceMetric),
    Experience(ExperienceMetric),
}

impl MetricRecord {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricRecord::Accuracy(_) => MetricKind::Accuracy,
            MetricRecord::Performance(_) => MetricKind::Performance,
            MetricRecord::Experience(_) => MetricKind::Experience,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MetricRecord::Accuracy(m) => m.timestamp,
            MetricRecord::Performance(m) => m.timestamp,
            MetricRecord::Experience(m) => m.timestamp,
        }
    }
}
