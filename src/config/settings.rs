use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::monitoring::thresholds::Thresholds;
use crate::utils::error::{MonitorError, Result};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "LOCATION_MONITOR_";

/// Longest accepted retention, one century
pub const MAX_RETENTION_DAYS: u32 = 36_500;

/// Longest accepted trend or dashboard window, one year
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 3_600;

/// Main configuration for the monitoring engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// Records retained per metric kind
    pub buffer_capacity: usize,
    /// Alerts retained, oldest evicted first
    pub alert_capacity: usize,
    /// Recommendations retained; closed ones are evicted first
    pub recommendation_capacity: usize,
    /// Scheduler cadence in seconds
    pub tick_interval_secs: u64,
    /// Upper bound of the failure backoff in seconds
    pub max_backoff_secs: u64,
    /// Metrics and alerts older than this are pruned each tick
    pub retention_days: u32,
    /// Most recent records averaged by trend analysis
    pub trend_sample_size: usize,
    /// Only records newer than this take part in trend analysis
    pub trend_window_secs: u64,
    /// Records required before a kind is aggregated for recommendations
    pub recommendation_min_samples: usize,
    /// Most recent records aggregated for recommendations
    pub recommendation_sample_size: usize,
    /// Dashboard aggregation window in seconds
    pub dashboard_window_secs: u64,
    /// Pending recommendations included in the dashboard
    pub dashboard_recommendation_limit: usize,
    /// Sample process CPU/memory on every tick
    pub enable_resource_sampling: bool,
    /// Deadline for each persistence, export or cache call
    pub sink_timeout_secs: u64,
    pub thresholds: Thresholds,
    pub persistence: PersistenceConfig,
    pub export: ExportConfig,
    pub cache: CacheConfig,
}

/// Persistence sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Write a JSON engine snapshot here on every tick
    pub json_path: Option<PathBuf>,
}

/// Metrics export configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Keep a Prometheus exposition for pull-based scrapers
    pub enable_prometheus: bool,
    /// POST the dashboard snapshot here on every tick
    pub http_endpoint: Option<String>,
}

/// External snapshot cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Redis connection URL; no cache when unset
    pub redis_url: Option<String>,
    pub key_prefix: String,
    /// Lifetime of a pushed dashboard snapshot
    pub ttl_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 10_000,
            alert_capacity: 10_000,
            recommendation_capacity: 1_000,
            tick_interval_secs: 30,
            max_backoff_secs: 300,
            retention_days: 30,
            trend_sample_size: 10,
            trend_window_secs: 300,
            recommendation_min_samples: 50,
            recommendation_sample_size: 1_000,
            dashboard_window_secs: 3_600,
            dashboard_recommendation_limit: 10,
            enable_resource_sampling: true,
            sink_timeout_secs: 10,
            thresholds: Thresholds::default(),
            persistence: PersistenceConfig::default(),
            export: ExportConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
            http_endpoint: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "location_monitor:".to_string(),
            ttl_secs: 120,
        }
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| MonitorError::config(format!("{}{}: {}", ENV_PREFIX, name, e)))
}

impl MonitorConfig {
    /// Set the tick interval
    pub fn with_tick_interval(mut self, secs: u64) -> Self {
        self.tick_interval_secs = secs;
        self
    }

    /// Set the per-kind buffer capacity
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Enable or disable process resource sampling
    pub fn with_resource_sampling(mut self, enabled: bool) -> Self {
        self.enable_resource_sampling = enabled;
        self
    }

    /// Persist a JSON snapshot to `path` every tick
    pub fn with_persist_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.persistence.json_path = Some(path.into());
        self
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| MonitorError::config(format!("Failed to parse config file: {}", e)))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MonitorError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Defaults with `LOCATION_MONITOR_*` overrides applied; reads `.env` if present
    pub fn from_env_overrides() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `LOCATION_MONITOR_*` overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let _ = dotenvy::dotenv();
        self.apply_overrides(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())
    }

    /// Apply overrides from `lookup`, keyed by the name without prefix
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TICK_INTERVAL_SECS") {
            self.tick_interval_secs = parse_env("TICK_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("RETENTION_DAYS") {
            self.retention_days = parse_env("RETENTION_DAYS", &v)?;
        }
        if let Some(v) = lookup("BUFFER_CAPACITY") {
            self.buffer_capacity = parse_env("BUFFER_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("REDIS_URL").filter(|v| !v.trim().is_empty()) {
            self.cache.redis_url = Some(v.trim().to_string());
        }
        if let Some(v) = lookup("HTTP_EXPORT").filter(|v| !v.trim().is_empty()) {
            self.export.http_endpoint = Some(v.trim().to_string());
        }
        if let Some(v) = lookup("PERSIST_PATH").filter(|v| !v.trim().is_empty()) {
            self.persistence.json_path = Some(PathBuf::from(v.trim()));
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity == 0 {
            return Err(MonitorError::config("buffer_capacity must be greater than 0"));
        }

        if self.alert_capacity == 0 {
            return Err(MonitorError::config("alert_capacity must be greater than 0"));
        }

        if self.recommendation_capacity == 0 {
            return Err(MonitorError::config(
                "recommendation_capacity must be greater than 0",
            ));
        }

        if self.tick_interval_secs == 0 {
            return Err(MonitorError::config("tick_interval_secs must be greater than 0"));
        }

        if self.max_backoff_secs < self.tick_interval_secs {
            return Err(MonitorError::config(
                "max_backoff_secs must be at least tick_interval_secs",
            ));
        }

        if self.trend_sample_size == 0
            || self.recommendation_min_samples == 0
            || self.recommendation_sample_size == 0
        {
            return Err(MonitorError::config("sample sizes must be greater than 0"));
        }

        if self.trend_sample_size > self.buffer_capacity {
            return Err(MonitorError::config(
                "trend_sample_size cannot exceed buffer_capacity",
            ));
        }

        if self.retention_days > MAX_RETENTION_DAYS {
            return Err(MonitorError::config(format!(
                "retention_days cannot exceed {}",
                MAX_RETENTION_DAYS
            )));
        }

        if self.trend_window_secs == 0 || self.trend_window_secs > MAX_WINDOW_SECS {
            return Err(MonitorError::config(format!(
                "trend_window_secs must be between 1 and {}",
                MAX_WINDOW_SECS
            )));
        }

        if self.dashboard_window_secs == 0 || self.dashboard_window_secs > MAX_WINDOW_SECS {
            return Err(MonitorError::config(format!(
                "dashboard_window_secs must be between 1 and {}",
                MAX_WINDOW_SECS
            )));
        }

        if self.sink_timeout_secs == 0 {
            return Err(MonitorError::config("sink_timeout_secs must be greater than 0"));
        }

        self.thresholds.validate()
    }
}
