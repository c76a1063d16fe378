//! # Location Monitor
//!
//! Production monitoring and optimization-recommendation engine for a location
//! service. Producers record location accuracy, service performance and user
//! experience metrics from any thread; the engine keeps a bounded rolling
//! history, raises alerts inline, and a background scheduler derives trend
//! alerts and optimization recommendations from aggregated statistics.
//!
//! ## Features
//!
//! - **Bounded ingestion**: fixed-capacity ring buffers per metric kind
//! - **Inline alerting**: threshold rules evaluated before `record_*` returns
//! - **Trend analysis and recommendations**: periodic, with error backoff
//! - **Pluggable sinks**: JSON persistence, Prometheus/HTTP export, Redis snapshot cache
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use location_monitor::{AccuracySample, GeoPoint, MonitorConfig, MonitoringEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = MonitoringEngine::new(MonitorConfig::default())?;
//!     engine.start()?;
//!
//!     let expected = GeoPoint::new(52.52, 13.405);
//!     let observed = GeoPoint::new(52.5203, 13.405);
//!     let alerts = engine.record_location_accuracy(
//!         AccuracySample::new("device-1", expected, observed, "gps").latency_ms(40.0),
//!     )?;
//!     println!("{} alerts, dashboard: {:?}", alerts.len(), engine.dashboard());
//!
//!     engine.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod monitoring;
pub mod utils;

// Re-export main types for convenience
pub use config::MonitorConfig;
pub use monitoring::{
    EngineSnapshot, EngineStats, MetricsExporter, MonitoringEngine, MonitoringEngineBuilder,
    PersistenceSink, SnapshotCache,
};
pub use utils::error::{MonitorError, Result};

// Re-export metric and query types
pub use monitoring::alerts::{Alert, AlertCategory, AlertLevel, AlertQuery};
pub use monitoring::dashboard::DashboardSnapshot;
pub use monitoring::geo::GeoPoint;
pub use monitoring::metrics::{
    AccuracySample, AccuracyTier, ExperienceSample, MetricKind, MetricRecord, PerformanceSample,
};
pub use monitoring::recommendations::{
    OptimizationRecommendation, RecommendationCategory, RecommendationQuery, RecommendationStatus,
};
pub use monitoring::scheduler::{CleanupReport, TickReport};

/// Initialize the monitor with default logging
pub async fn init() -> Result<()> {
    utils::logging::init_logging()?;
    Ok(())
}

/// Initialize the monitor with custom logging configuration
pub async fn init_with_logging(level: tracing::Level) -> Result<()> {
    utils::logging::init_logging_with_level(level)?;
    Ok(())
}
