// Background scheduling loop for periodic analysis
// One task per engine; only the sleep between ticks is cancellable

use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Stage of a scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickStage {
    ResourceSampling,
    TrendAnalysis,
    Recommendations,
    Persistence,
    Export,
    Cache,
    Cleanup,
}

impl TickStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickStage::ResourceSampling => "resource_sampling",
            TickStage::TrendAnalysis => "trend_analysis",
            TickStage::Recommendations => "recommendations",
            TickStage::Persistence => "persistence",
            TickStage::Export => "export",
            TickStage::Cache => "cache",
            TickStage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for TickStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage that failed during a tick; the remaining stages still ran
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: TickStage,
    /// Sink or exporter name, when the stage fans out
    pub target: Option<String>,
    pub error: String,
}

impl StageFailure {
    pub fn new(stage: TickStage, target: Option<&str>, error: &MonitorError) -> Self {
        Self {
            stage,
            target: target.map(str::to_string),
            error: error.to_string(),
        }
    }
}

/// Metrics, alerts and closed recommendations removed by a retention pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cutoff: DateTime<Utc>,
    pub metrics_removed: usize,
    pub alerts_removed: usize,
    #[serde(default)]
    pub recommendations_removed: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.metrics_removed + self.alerts_removed + self.recommendations_removed
    }
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub started_at: DateTime<Utc>,
    pub resource_alerts: usize,
    pub trend_alerts: usize,
    pub new_recommendations: usize,
    pub cleanup: Option<CleanupReport>,
    pub failures: Vec<StageFailure>,
}

impl TickReport {
    pub fn new(tick: u64, started_at: DateTime<Utc>) -> Self {
        Self {
            tick,
            started_at,
            resource_alerts: 0,
            trend_alerts: 0,
            new_recommendations: 0,
            cleanup: None,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, stage: TickStage) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }
}

/// Work performed on every tick
#[async_trait::async_trait]
pub trait TickRunner: Send + Sync + 'static {
    async fn run_tick(&self) -> TickReport;
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub max_backoff: Duration,
}

impl SchedulerSettings {
    /// Delay before the next tick: doubled after a failed tick, capped at
    /// `max_backoff`, and back to `interval` after a clean one
    pub fn next_delay(&self, current: Duration, clean: bool) -> Duration {
        if clean {
            self.interval
        } else {
            current
                .saturating_mul(2)
                .min(self.max_backoff.max(self.interval))
        }
    }
}

/// Handle to a running scheduler task
pub struct MonitoringScheduler {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitoringScheduler {
    /// Spawn the loop on the current tokio runtime
    pub fn spawn<R: TickRunner>(runner: Arc<R>, settings: SchedulerSettings) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            MonitorError::scheduler(format!("start requires a tokio runtime: {}", e))
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = runtime.spawn(run(runner, settings, shutdown_rx));

        info!(
            interval_secs = settings.interval.as_secs(),
            max_backoff_secs = settings.max_backoff.as_secs(),
            "Monitoring scheduler started"
        );
        Ok(Self { shutdown_tx, task })
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for an in-flight tick to complete
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Monitoring scheduler task ended abnormally");
        }
        info!("Monitoring scheduler stopped");
    }
}

async fn run<R: TickRunner>(runner: Arc<R>, settings: SchedulerSettings, mut shutdown_rx: watch::Receiver<bool>) {
    let mut delay = settings.interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        // The tick itself is never raced against shutdown
        let started = Instant::now();
        let report = runner.run_tick().await;
        let next = settings.next_delay(delay, report.is_clean());

        if report.is_clean() {
            debug!(
                tick = report.tick,
                duration_ms = started.elapsed().as_millis() as u64,
                "Scheduler tick completed"
            );
        } else {
            warn!(
                tick = report.tick,
                failures = report.failures.len(),
                duration_ms = started.elapsed().as_millis() as u64,
                next_delay_secs = next.as_secs_f64(),
                "Scheduler tick had failures, backing off"
            );
        }
        delay = next;

        if *shutdown_rx.borrow() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    struct FlakyRunner {
        ticks: AtomicU64,
        fail: bool,
        seen: Mutex<Vec<tokio::time::Instant>>,
    }

    impl FlakyRunner {
        fn new(fail: bool) -> Self {
            Self {
                ticks: AtomicU64::new(0),
                fail,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl TickRunner for FlakyRunner {
        async fn run_tick(&self) -> TickReport {
            let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().unwrap().push(tokio::time::Instant::now());
            let mut report = TickReport::new(tick, Utc::now());
            if self.fail {
                report.failures.push(StageFailure::new(
                    TickStage::Persistence,
                    Some("test"),
                    &MonitorError::persistence("test", "disk full"),
                ));
            }
            report
        }
    }

    fn settings(interval_ms: u64, max_ms: u64) -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_millis(interval_ms),
            max_backoff: Duration::from_millis(max_ms),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let s = settings(30_000, 300_000);
        let mut delay = s.interval;
        let mut delays = Vec::new();
        for _ in 0..5 {
            delay = s.next_delay(delay, false);
            delays.push(delay.as_secs());
        }
        assert_eq!(delays, vec![60, 120, 240, 300, 300]);
        assert_eq!(s.next_delay(delay, true), s.interval);
    }

    #[test]
    fn test_spawn_outside_runtime_fails() {
        let err = MonitoringScheduler::spawn(Arc::new(FlakyRunner::new(false)), settings(10, 10))
            .err()
            .unwrap();
        assert!(matches!(err, MonitorError::Scheduler { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_ticks_keep_interval() {
        let runner = Arc::new(FlakyRunner::new(false));
        let scheduler = MonitoringScheduler::spawn(runner.clone(), settings(1_000, 8_000)).unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        scheduler.shutdown().await;
        assert_eq!(runner.ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_ticks_back_off() {
        let runner = Arc::new(FlakyRunner::new(true));
        let scheduler = MonitoringScheduler::spawn(runner.clone(), settings(1_000, 4_000)).unwrap();

        // Ticks land at 1s, 3s, 7s, 11s
        tokio::time::sleep(Duration::from_millis(11_500)).await;
        scheduler.shutdown().await;
        assert_eq!(runner.ticks.load(Ordering::SeqCst), 4);

        let seen = runner.seen.lock().unwrap().clone();
        let gaps: Vec<u64> = seen.windows(2).map(|w| (w[1] - w[0]).as_millis() as u64).collect();
        assert_eq!(gaps, vec![2_000, 4_000, 4_000]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_sleep_promptly() {
        let runner = Arc::new(FlakyRunner::new(false));
        let scheduler = MonitoringScheduler::spawn(runner.clone(), settings(3_600_000, 3_600_000)).unwrap();

        let started = std::time::Instant::now();
        scheduler.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(runner.ticks.load(Ordering::SeqCst), 0);
    }
}
