use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vigil::aggregator::MetricsAggregator;
use vigil::alerts::{AlertEngine, AlertNotifier};
use vigil::broadcaster::{Broadcaster, HEARTBEAT_INTERVAL};
use vigil::bus::EventBus;
use vigil::settings::Settings;
use vigil::simulator::{SimulatorOptions, TrafficSimulator};
use vigil::store::{JsonlStore, MemoryStore, Recorder, TimeSeriesStore};
use vigil::synthetics::Synthetics;

/// How often the resource gauges refresh in the background
const RESOURCE_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Command-line arguments for the API monitoring core
#[derive(Parser)]
#[command(
    name = "vigil",
    about = "API monitoring core - metrics aggregation, alerting and synthetic probes",
    long_about = "Collects request, query and service-health metrics into a live snapshot, \
                  evaluates alert thresholds, runs scheduled synthetic probes with jitter \
                  and backoff, and streams updates to connected clients."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Settings file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose logging output (sets RUST_LOG=debug)")]
    verbose: bool,

    /// Persist time-series data under this directory
    #[arg(
        long,
        value_name = "DIR",
        help = "Data directory for the durable store; omit for in-memory only"
    )]
    data_dir: Option<PathBuf>,

    /// Generate synthetic traffic
    #[arg(long, help = "Start the traffic simulator")]
    simulate: bool,

    /// Simulated API requests per second
    #[arg(long, default_value_t = 5, help = "Simulator requests per second")]
    rps: u64,

    /// Simulated database queries per second
    #[arg(long, default_value_t = 2, help = "Simulator database queries per second")]
    db_qps: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => {
            info!("no settings file given, using defaults");
            Settings::default()
        }
    };

    let bus = EventBus::new();

    let store: Arc<dyn TimeSeriesStore> = match &cli.data_dir {
        Some(dir) => {
            info!("using durable store under {}", dir.display());
            Arc::new(JsonlStore::open(dir)?)
        }
        None => {
            info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let aggregator = MetricsAggregator::new(bus.clone(), settings.aggregator_config());
    let recorder = Recorder::start(&bus, store);
    let mut broadcaster = Broadcaster::start(&bus, HEARTBEAT_INTERVAL);

    // Background gauge refresh, independent of snapshot reads
    let refresh_aggregator = aggregator.clone();
    let resource_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RESOURCE_REFRESH_INTERVAL);
        loop {
            ticker.tick().await;
            refresh_aggregator.refresh_resources();
        }
    });

    let notifier = AlertNotifier::new(
        &settings.alerts.slack_webhook_url,
        &settings.alerts.webhook_url,
    );
    if !notifier.is_configured() {
        warn!("no notification channels configured, alert dispatch is disabled");
    }

    let mut engine = AlertEngine::new(
        aggregator.clone(),
        settings.thresholds,
        Duration::from_secs(settings.alert_check_interval_secs),
    );
    engine.start();

    let synthetics = Synthetics::new(aggregator.clone(), notifier, settings.synthetics_config());
    synthetics.start();

    let simulator = TrafficSimulator::new(aggregator.clone());
    if cli.simulate {
        simulator.start(SimulatorOptions {
            rps: cli.rps,
            db_qps: cli.db_qps,
        });
    }

    info!("vigil running, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
    }

    info!("shutting down");
    simulator.stop();
    synthetics.stop();
    engine.stop();
    resource_task.abort();
    broadcaster.stop();
    recorder.stop();

    Ok(())
}
