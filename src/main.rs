//! SDS011 → MQTT bridge, main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  SerialSensor     MqttBus        SystemClock    LogEventSink   │
//! │  / MockSensor     (BusPort)      (ClockPort)    (EventSink)    │
//! │  (SensorPort)                                                  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              Orchestrator (pure logic)                 │    │
//! │  │  DutyCycle · CyclePlanner · Subscriptions              │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use log::{error, info};

use sds011_mqtt::adapters::log_sink::LogEventSink;
use sds011_mqtt::adapters::mock_sensor::MockSensor;
use sds011_mqtt::adapters::mqtt::{MqttBus, MqttSettings};
use sds011_mqtt::adapters::serial_sensor::SerialSensor;
use sds011_mqtt::adapters::time::SystemClock;
use sds011_mqtt::app::ports::SensorPort;
use sds011_mqtt::app::service::Orchestrator;
use sds011_mqtt::config::{DEFAULT_CONFIG_PATH, SystemConfig};
use sds011_mqtt::logging::{self, LogSettings};
use sds011_mqtt::shutdown::{ShutdownToken, install_signal_handler};

// ── Command line ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn filter(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "SDS011 sensor to MQTT bridge")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "conf-file", default_value = DEFAULT_CONFIG_PATH)]
    conf_file: PathBuf,

    /// Log level (overrides the config file)
    #[arg(short = 'l', long = "log-level", value_enum)]
    log_level: Option<LogLevel>,

    /// Log to this file, rotated by size (overrides the config file)
    #[arg(short = 'f', long = "log-file")]
    log_file: Option<PathBuf>,

    /// Also print log records to the console when logging to a file
    #[arg(short = 'p', long = "log-print")]
    log_print: bool,

    /// Use a dummy sensor instead of the serial device
    #[arg(short = 'm', long = "mock-sensor")]
    mock_sensor: bool,

    /// Log for systemd/journald (no timestamps)
    #[arg(short = 's', long = "systemd")]
    systemd: bool,
}

/// Command-line logging switches win over the file.
fn log_settings(cli: &Cli, config: Option<&SystemConfig>) -> LogSettings {
    let mut settings = match config {
        Some(config) => LogSettings::from_config(config, log_filter(cli, config), cli.systemd),
        None => LogSettings::console(cli.log_level.map_or("info", LogLevel::filter), cli.systemd),
    };
    if let Some(file) = &cli.log_file {
        settings.file = Some(file.clone());
    }
    settings.print |= cli.log_print;
    settings
}

fn init_logging(settings: &LogSettings) {
    if let Err(e) = logging::init(settings) {
        let fallback = LogSettings::console(&settings.filter, settings.systemd);
        // Nothing was installed yet, so the console logger takes over.
        let _ = logging::init(&fallback);
        if let Some(file) = &settings.file {
            error!("cannot open log file {}: {e}", file.display());
        }
    }
}

fn log_filter(cli: &Cli, config: &SystemConfig) -> &'static str {
    if let Some(level) = cli.log_level {
        return level.filter();
    }
    match config.log_level.as_deref().map(str::to_ascii_lowercase).as_deref() {
        Some("debug") => "debug",
        Some("warning" | "warn") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

// ── Entry point ───────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    // Logging depends on the config file, so read it before anything else.
    let config = SystemConfig::load(&cli.conf_file);
    init_logging(&log_settings(&cli, config.as_ref().ok()));

    let outcome = config
        .with_context(|| format!("loading {}", cli.conf_file.display()))
        .and_then(|config| run(&cli, config));

    if let Err(e) = outcome {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli, mut config: SystemConfig) -> Result<()> {
    if cli.mock_sensor {
        config.mock_sensor = true;
    }
    config.validate().context("invalid configuration")?;

    info!("SDS011 to MQTT bridge v{}", env!("CARGO_PKG_VERSION"));

    let shutdown = ShutdownToken::new();
    install_signal_handler(&shutdown).context("installing signal handler")?;

    if config.mock_sensor {
        info!("using mocked sensor");
        run_with(&config, MockSensor::new(), shutdown)
    } else {
        let port = config.serial_port.clone().unwrap_or_default();
        let sensor = SerialSensor::new(port, config.abort_after_n_errors);
        run_with(&config, sensor, shutdown)
    }
}

fn run_with(config: &SystemConfig, sensor: impl SensorPort, shutdown: ShutdownToken) -> Result<()> {
    let settings = MqttSettings::from_config(config).context("MQTT settings")?;
    let bus = MqttBus::new(settings);

    let mut orchestrator = Orchestrator::new(config, sensor, bus, SystemClock::new(), shutdown)
        .context("subscription settings")?;
    let mut sink = LogEventSink::new();
    orchestrator.run(&mut sink)
}
