use clap::Parser;
use serial_sharer::config::{Config, ConfigLoader, LogFormat};
use serial_sharer::error::{SharerError, SharerResult};
use serial_sharer::link::open_all;
use serial_sharer::logging;
use serial_sharer::supervisor::{StopReason, Supervisor};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::signal;
use tracing::{error, info};

// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    version,
    about = "Share one serial device between several serial controllers.",
    long_about = "Forwards line-based request/reply exchanges from any number of upstream controller ports to a single downstream device port, granting the device to one controller per exchange."
)]
struct Args {
    /// Configuration file. Defaults to the standard search locations.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Shared downstream device, e.g. /dev/ttyUSB0 or COM1.
    #[arg(short, long, value_name = "DEV")]
    shared: Option<String>,

    /// Upstream controller device. Repeat for each controller.
    #[arg(short = 'C', long = "controller", value_name = "DEV")]
    controllers: Vec<String>,

    /// Baud rate for every link.
    #[arg(short, long)]
    baud: Option<u32>,

    /// Request and reply timeout in milliseconds.
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Pause after losing the slot to another controller, in milliseconds.
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Log level or filter directive. RUST_LOG takes precedence.
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(shared) = self.shared {
            config.shared.device = Some(shared);
        }
        if !self.controllers.is_empty() {
            config.controllers.devices = self.controllers;
        }
        if let Some(baud) = self.baud {
            config.link.baud_rate = baud;
        }
        if let Some(timeout) = self.timeout_ms {
            config.link.read_timeout_ms = timeout;
        }
        if let Some(backoff) = self.backoff_ms {
            config.arbiter.backoff_ms = backoff;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

// --- Main Application Entry Point ---
#[tokio::main]
async fn main() -> ExitCode {
    // Logging is not up yet, so setup failures go straight to stderr.
    let config = match prepare(Args::parse()) {
        Ok(Some(config)) => config,
        Ok(None) => return ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "serial-sharer stopped");
            ExitCode::FAILURE
        }
    }
}

/// Load and validate the configuration, then start logging.
///
/// Returns `None` when the invocation only asked for the effective config.
fn prepare(args: Args) -> SharerResult<Option<Config>> {
    let loader = match args.config.as_deref() {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    let config_path = loader.config_path.clone();
    let print_config = args.print_config;

    let mut config = loader.into_config();
    args.apply(&mut config);

    if print_config {
        let rendered = toml::to_string_pretty(&config).map_err(serial_sharer::ConfigError::from)?;
        print!("{rendered}");
        return Ok(None);
    }

    config.validate()?;
    logging::init(&config.logging)?;

    info!(
        config = ?config_path,
        shared = %config.shared_device()?,
        controllers = ?config.controllers.devices,
        baud = config.link.baud_rate,
        "serial-sharer starting"
    );
    Ok(Some(config))
}

async fn serve(config: Config) -> SharerResult<()> {
    let (shared, controllers) = open_all(
        config.shared_device()?,
        &config.controllers.devices,
        &config.link_settings(),
    )
    .map_err(|(device, source)| SharerError::Open { device, source })?;

    let supervisor = Supervisor::new(shared, controllers, config.supervisor_settings())?;
    let summary = supervisor.run(shutdown_signal()).await?;

    info!(
        reason = ?summary.reason,
        grants = summary.arbiter.grants,
        refusals = summary.arbiter.refusals,
        "serial-sharer stopped"
    );
    if summary.reason == StopReason::SessionsEnded {
        info!("no controller sessions left");
    }
    Ok(())
}

// --- Graceful Shutdown Handler ---
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, starting graceful shutdown");
}
