use clap::{Parser, Subcommand};
use colored::*;
use location_monitor::monitoring::thresholds::Thresholds;
use location_monitor::{
    AccuracySample, AlertLevel, AlertQuery, DashboardSnapshot, ExperienceSample, GeoPoint,
    MonitorConfig, MonitoringEngine, PerformanceSample, RecommendationQuery, RecommendationStatus,
};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "location-monitor")]
#[command(about = "Monitoring and optimization recommendations for a location service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, env = "LOCATION_MONITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring scheduler until interrupted
    Run,

    /// Feed synthetic traffic through the engine and show the results
    Simulate {
        /// How long producers run, in seconds
        #[arg(short, long, default_value = "5")]
        seconds: u64,

        /// Samples per metric kind per second
        #[arg(short, long, default_value = "100")]
        rate: usize,

        /// Share of degraded samples (0.0 - 1.0)
        #[arg(long, default_value = "0.2", value_parser = parse_fraction)]
        degraded: f64,
    },

    /// Initialize a new configuration file
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "location_monitor.toml")]
        output: PathBuf,
    },

    /// Show or change alert thresholds and recommendation targets
    Thresholds {
        /// Threshold updates as name=value
        #[arg(short, long = "set")]
        set: Vec<String>,
    },

    /// Print the Prometheus exposition after synthetic traffic
    Metrics {
        /// Number of samples per metric kind
        #[arg(short, long, default_value = "100")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.json_logs {
        location_monitor::utils::logging::init_json_logging()?;
    } else {
        let log_level = if cli.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };
        location_monitor::init_with_logging(log_level).await?;
    }

    // Load configuration
    let mut config = if let Some(config_path) = &cli.config {
        MonitorConfig::from_file(config_path)?
    } else {
        MonitorConfig::default()
    };
    config.apply_env_overrides()?;

    match cli.command {
        Commands::Run => {
            run_monitor(config).await?;
        }
        Commands::Simulate {
            seconds,
            rate,
            degraded,
        } => {
            run_simulate(config, seconds, rate, degraded).await?;
        }
        Commands::Init { output } => {
            run_init(output)?;
        }
        Commands::Thresholds { set } => {
            run_thresholds(config, cli.config, set)?;
        }
        Commands::Metrics { count } => {
            run_metrics(config, count).await?;
        }
    }

    Ok(())
}

async fn run_monitor(config: MonitorConfig) -> anyhow::Result<()> {
    let interval = Duration::from_secs(config.tick_interval_secs);
    let engine = MonitoringEngine::new(config)?;
    engine.start()?;
    info!("Monitoring engine running, press Ctrl-C to stop");

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => print_dashboard(&engine.dashboard()),
            result = &mut shutdown => {
                result?;
                break;
            }
        }
    }

    info!("Shutdown requested");
    engine.stop().await;
    print_dashboard(&engine.dashboard());
    Ok(())
}

async fn run_simulate(
    config: MonitorConfig,
    seconds: u64,
    rate: usize,
    degraded: f64,
) -> anyhow::Result<()> {
    let engine = MonitoringEngine::new(config)?;
    engine.start()?;

    // Ten batches per second
    let batch = (rate / 10).max(1);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(seconds);
    let mut pacing = tokio::time::interval(Duration::from_millis(100));
    let mut recorded = 0;
    let mut raised = 0;
    while tokio::time::Instant::now() < deadline {
        pacing.tick().await;
        raised += simulate_traffic(&engine, batch, degraded)?;
        recorded += batch;
    }
    engine.stop().await;

    println!(
        "{} {} samples per kind over {}s, {} inline alerts",
        "Recorded".green(),
        recorded,
        seconds,
        raised
    );

    let report = engine.run_tick().await;
    let status = if report.is_clean() {
        "ok".green()
    } else {
        "failed stages".red()
    };
    println!(
        "Tick {}: {} trend alerts, {} new recommendations ({})",
        report.tick, report.trend_alerts, report.new_recommendations, status
    );
    for failure in &report.failures {
        println!("  {} {}: {}", "!".red(), failure.stage, failure.error);
    }

    print_dashboard(&engine.dashboard());
    print_alerts(&engine);
    print_recommendations(&engine);
    Ok(())
}

fn run_init(output: PathBuf) -> anyhow::Result<()> {
    let config = MonitorConfig::default();
    config.save_to_file(&output)?;

    println!("Created configuration file: {}", output.display());
    Ok(())
}

fn run_thresholds(
    mut config: MonitorConfig,
    config_path: Option<PathBuf>,
    set: Vec<String>,
) -> anyhow::Result<()> {
    if !set.is_empty() {
        let mut updates = BTreeMap::new();
        for entry in &set {
            let (name, value) = entry
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("expected name=value, got '{}'", entry))?;
            updates.insert(name.trim().to_string(), value.trim().parse::<f64>()?);
        }
        config.thresholds = config.thresholds.with_updates(&updates)?;

        match &config_path {
            Some(path) => {
                config.save_to_file(path)?;
                println!("{} {}", "Updated".green(), path.display());
            }
            None => warn!("No --config given, updates are shown but not saved"),
        }
    }

    let defaults = Thresholds::default().to_map();
    println!("{}", "Thresholds".bold());
    for (name, value) in config.thresholds.to_map() {
        let marker = if defaults.get(&name) == Some(&value) {
            String::new()
        } else {
            " (changed)".yellow().to_string()
        };
        println!("  {:<24} {:>10}{}", name, value, marker);
    }
    Ok(())
}

async fn run_metrics(config: MonitorConfig, count: usize) -> anyhow::Result<()> {
    let engine = MonitoringEngine::new(config)?;
    simulate_traffic(&engine, count, 0.2)?;
    engine.run_tick().await;
    print!("{}", engine.prometheus_text());
    Ok(())
}

/// Record `count` synthetic samples of each kind; returns the inline alert count
fn simulate_traffic(engine: &MonitoringEngine, count: usize, degraded: f64) -> anyhow::Result<usize> {
    const METHODS: [&str; 5] = ["gps", "fused", "wifi", "cell", "ip"];
    const ENDPOINTS: [(&str, &str); 4] = [
        ("geocoder", "/v1/geocode"),
        ("geocoder", "/v1/reverse"),
        ("routing", "/v1/eta"),
        ("places", "/v1/nearby"),
    ];
    const ACTIONS: [&str; 4] = ["search", "share_location", "navigate", "check_in"];

    let mut rng = rand::thread_rng();
    let mut raised = 0;

    for i in 0..count {
        let bad = rng.gen_bool(degraded);

        let expected = GeoPoint::new(rng.gen_range(-60.0..60.0), rng.gen_range(-170.0..170.0));
        let error_m = if bad {
            rng.gen_range(60.0..400.0)
        } else {
            rng.gen_range(0.5..25.0)
        };
        let method = METHODS.choose(&mut rng).copied().unwrap_or("gps");
        raised += engine
            .record_location_accuracy(
                AccuracySample::new(
                    &format!("device-{}", i % 50),
                    expected,
                    expected.offset_north(error_m),
                    method,
                )
                .latency_ms(rng.gen_range(5.0..80.0)),
            )?
            .len();

        let (service, endpoint) = ENDPOINTS.choose(&mut rng).copied().unwrap_or(ENDPOINTS[0]);
        let latency = if bad {
            rng.gen_range(1500.0..6500.0)
        } else {
            rng.gen_range(40.0..600.0)
        };
        let mut perf = PerformanceSample::new(service, endpoint, latency, if bad { 503 } else { 200 })
            .cache_hit_ratio(rng.gen_range(0.4..0.95));
        if bad && rng.gen_bool(0.5) {
            perf = perf.error_kind("upstream_timeout");
        }
        raised += engine.record_service_performance(perf)?.len();

        let action = ACTIONS.choose(&mut rng).copied().unwrap_or("search");
        let mut experience = ExperienceSample::new(
            &format!("user-{}", i % 200),
            &format!("session-{}", i % 40),
            action,
            !bad,
            rng.gen_range(100.0..4000.0),
        )
        .retries(if bad { rng.gen_range(0..6) } else { 0 });
        if rng.gen_bool(0.6) {
            experience = experience.satisfaction(if bad {
                rng.gen_range(0.2..0.75)
            } else {
                rng.gen_range(0.75..1.0)
            });
        }
        raised += engine.record_user_experience(experience)?.len();
    }

    Ok(raised)
}

/// A finite share between 0.0 and 1.0
fn parse_fraction(value: &str) -> Result<f64, String> {
    let share: f64 = value
        .trim()
        .parse()
        .map_err(|e| format!("not a number: {}", e))?;
    if !share.is_finite() || !(0.0..=1.0).contains(&share) {
        return Err(format!("{} is not between 0.0 and 1.0", value));
    }
    Ok(share)
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn print_dashboard(snapshot: &DashboardSnapshot) {
    println!();
    println!("{}", "Dashboard".bright_cyan().bold());
    println!(
        "  Accuracy     {} samples, tiers {:?}, mean {} m",
        snapshot.accuracy.samples,
        snapshot.accuracy.tier_distribution,
        fmt_opt(snapshot.accuracy.mean_accuracy_m, 1)
    );
    println!(
        "  Performance  {} samples, mean latency {} ms, error rate {}, cache hit {}",
        snapshot.performance.samples,
        fmt_opt(snapshot.performance.mean_latency_ms, 0),
        fmt_opt(snapshot.performance.error_rate, 3),
        fmt_opt(snapshot.performance.mean_cache_hit_ratio, 2)
    );
    println!(
        "  Experience   {} samples, success rate {}, satisfaction {}",
        snapshot.experience.samples,
        fmt_opt(snapshot.experience.success_rate, 3),
        fmt_opt(snapshot.experience.mean_satisfaction, 2)
    );
    println!(
        "  Alerts       {} unresolved {:?}",
        snapshot.unresolved_total(),
        snapshot.unresolved_alerts
    );
    println!(
        "  Pending recommendations: {}",
        snapshot.pending_recommendations
    );
}

fn print_alerts(engine: &MonitoringEngine) {
    let alerts = engine.list_alerts(&AlertQuery::unresolved());
    if alerts.is_empty() {
        return;
    }

    println!();
    println!("{} ({})", "Unresolved alerts".bold(), alerts.len());
    for alert in alerts.iter().rev().take(10) {
        let level = match alert.level {
            AlertLevel::Critical | AlertLevel::Error => alert.level.as_str().red(),
            AlertLevel::Warning => alert.level.as_str().yellow(),
            AlertLevel::Info => alert.level.as_str().normal(),
        };
        println!("  [{}] {} - {}", level, alert.title, alert.message);
    }
}

fn print_recommendations(engine: &MonitoringEngine) {
    let recommendations = engine
        .list_recommendations(&RecommendationQuery::default().status(RecommendationStatus::Pending));
    if recommendations.is_empty() {
        return;
    }

    println!();
    println!("{}", "Recommendations".bold());
    for rec in recommendations {
        println!(
            "  [{}] {} ({:.0}% potential, {} effort)",
            rec.priority.as_str().yellow(),
            rec.title.green(),
            rec.potential_improvement_pct,
            rec.effort
        );
        println!("      {}", rec.description);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degraded_share_must_be_a_finite_fraction() {
        assert_eq!(parse_fraction("0.25").unwrap(), 0.25);
        assert_eq!(parse_fraction("1").unwrap(), 1.0);
        assert!(parse_fraction("NaN").is_err());
        assert!(parse_fraction("inf").is_err());
        assert!(parse_fraction("1.5").is_err());
        assert!(parse_fraction("-0.1").is_err());
        assert!(parse_fraction("lots").is_err());
    }

    #[test]
    fn test_simulate_rejects_nan_on_the_command_line() {
        assert!(Cli::try_parse_from(["location-monitor", "simulate", "--degraded", "NaN"]).is_err());
        assert!(Cli::try_parse_from(["location-monitor", "simulate", "--degraded", "0.5"]).is_ok());
    }
}
