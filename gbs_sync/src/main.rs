//! # GBS Sync Controller
//!
//! Runs the sync watcher and timing-lock loop against a scaler board.
//!
//! The board driver is picked by name from the driver registry. With
//! `--source` the simulation driver is fed one of its built-in signal
//! presets, which makes the binary usable without hardware.

use clap::{Parser, ValueEnum};
use gbs_common::config::{ConfigError, LogFormat, LogLevel, ServiceConfig};
use gbs_common::consts::DEFAULT_CONFIG_PATH;
use gbs_common::hal::ScalerDriver;
use gbs_hal::drivers::simulation;
use gbs_hal::{DriverRegistry, SignalSource, SimulationDriver};
use gbs_sync::{SyncConfig, SyncContext, SyncRunner, TickOutcome};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Simulated signal presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourcePreset {
    None,
    Ntsc480i,
    Ntsc240p,
    Pal576i,
    Edtv480p,
    VgaHv,
}

impl SourcePreset {
    fn signal(self) -> SignalSource {
        match self {
            Self::None => SignalSource::none(),
            Self::Ntsc480i => SignalSource::ntsc_480i(),
            Self::Ntsc240p => SignalSource::ntsc_240p(),
            Self::Pal576i => SignalSource::pal_576i(),
            Self::Edtv480p => SignalSource::edtv_480p(),
            Self::VgaHv => SignalSource::vga_hv(),
        }
    }
}

/// GBS sync controller - adaptive sync watcher and frame timing lock
#[derive(Parser, Debug)]
#[command(name = "gbs_sync")]
#[command(author = "GBS")]
#[command(version)]
#[command(about = "Adaptive sync watcher and timing-lock controller for TV5725 scalers")]
struct Args {
    /// Path to the controller configuration TOML.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Board driver name from the driver registry.
    #[arg(long, default_value = simulation::NAME)]
    driver: String,

    /// Feed the simulation driver a built-in signal.
    #[arg(long, value_enum)]
    source: Option<SourcePreset>,

    /// Stop after this many watcher ticks (runs until Ctrl-C otherwise).
    #[arg(long)]
    ticks: Option<u64>,

    /// One level noisier than the configured `log_level`.
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format regardless of `log_format`.
    #[arg(long)]
    json: bool,

    /// Print the final status snapshot as JSON on stdout.
    #[arg(long)]
    status_json: bool,
}

fn main() {
    let args = Args::parse();

    let loaded = SyncConfig::load_validated(&args.config);
    let missing = matches!(loaded, Err(ConfigError::FileNotFound(_)));
    let loaded = if missing { Ok(SyncConfig::default()) } else { loaded };
    let service = loaded
        .as_ref()
        .map(|config| config.service.clone())
        .unwrap_or_default();
    setup_tracing(&args, &service);

    info!("GBS sync controller v{} starting...", env!("CARGO_PKG_VERSION"));
    if missing {
        warn!("No config at {}, using defaults", args.config.display());
    }

    let result = loaded
        .map_err(Box::<dyn std::error::Error>::from)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("GBS sync controller shutdown complete");
}

fn create_driver(args: &Args) -> Result<Box<dyn ScalerDriver>, Box<dyn std::error::Error>> {
    if let Some(preset) = args.source {
        if args.driver != simulation::NAME {
            return Err(format!("--source needs the {} driver", simulation::NAME).into());
        }
        info!(?preset, "Simulated source");
        return Ok(Box::new(SimulationDriver::new().with_source(preset.signal())));
    }
    let registry = DriverRegistry::with_builtin_drivers();
    info!(available = ?registry.list_drivers(), driver = %args.driver, "Creating driver");
    Ok(registry.create_driver(&args.driver)?)
}

fn run(args: &Args, config: SyncConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        service = %config.service.service_name,
        tick_ms = config.tuning.watcher_tick_ms,
        frame_time_lock = config.options.frame_time_lock,
        "Config OK"
    );

    let driver = create_driver(args)?;
    let mut runner = SyncRunner::new(SyncContext::new(driver, config));
    runner.init()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let mut last = None;
    let mut ticks = 0u64;
    while running.load(Ordering::SeqCst) && args.ticks.is_none_or(|limit| ticks < limit) {
        let report = runner.step()?;
        ticks += 1;
        let changed = last.is_none_or(|prev: TickOutcome| {
            std::mem::discriminant(&prev) != std::mem::discriminant(&report.outcome)
        });
        if changed {
            info!(outcome = ?report.outcome, events = ?report.events, "Watcher");
        }
        last = Some(report.outcome);
    }

    let status = runner.status();
    info!(
        standard = %status.standard,
        ticks,
        uptime_ms = status.uptime_ms,
        "Stopping"
    );
    if args.status_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    }
    runner.shutdown()?;
    Ok(())
}

fn setup_tracing(args: &Args, service: &ServiceConfig) {
    let level = if args.verbose {
        service.log_level.louder()
    } else {
        service.log_level
    };
    let level = match level {
        LogLevel::Error => Level::ERROR,
        LogLevel::Warn => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Trace => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json || service.log_format == LogFormat::Json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
