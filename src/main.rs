//! Beacon - alert queue, retry and error reporting demo
//!
//! A terminal dashboard that exercises the alert queue, the retry engine
//! and the error tracker against a simulated flaky backend.
//!
//! ## Usage
//!
//! ```bash
//! # Start the demo
//! beacon
//!
//! # With verbose logging
//! beacon -v
//!
//! # With a custom config file and log directory
//! beacon --config ./beacon.yaml --log-dir /tmp/beacon-logs
//!
//! # Validate the config and exit without starting the dashboard
//! beacon --check-config
//! ```

mod app;

use std::io::Write;
use std::panic;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use beacon_core::config::{default_config_path, BeaconConfig};
use beacon_core::logging::{init_file_logging, init_logging};
use beacon_core::LogGuard;
use clap::Parser;
use tracing::{error, info};

use crate::app::App;

/// Beacon alert and retry demo
///
/// Push alerts of every kind, watch them expire, and run a flaky fetch
/// through the retry engine.
#[derive(Parser, Debug)]
#[command(name = "beacon")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.beacon/logs/)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Config file (defaults to ~/.beacon/config.yaml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load and validate the config, print the effective settings, and exit
    #[arg(long)]
    check_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    install_panic_hook();

    if cli.check_config {
        return match check_config(&cli) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Config check failed: {:#}", e);
                ExitCode::from(1)
            }
        };
    }

    match run(&cli) {
        Ok(()) => {
            info!("Beacon exited normally");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Beacon error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<(PathBuf, BeaconConfig)> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };
    let config = BeaconConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    Ok((config_path, config))
}

/// Report the effective settings on stdout; problems go to the console log.
fn check_config(cli: &Cli) -> anyhow::Result<()> {
    let (path, config) = load_config(cli)?;
    info!(path = %path.display(), "config is valid");
    println!("config: {}", path.display());
    println!(
        "alerts: capacity={} dedup_window={}ms default_duration={}ms error_duration={}ms",
        config.alerts.capacity,
        config.alerts.dedup_window_ms,
        config.alerts.default_duration_ms,
        config.alerts.error_duration_ms
    );
    println!(
        "retry: max_attempts={} base_delay={}ms max_delay={}ms exponential={} jitter={}",
        config.retry.max_attempts,
        config.retry.base_delay_ms,
        config.retry.max_delay_ms,
        config.retry.exponential_backoff,
        config.retry.jitter
    );
    println!(
        "reporting: max_history={} console_logging={}",
        config.reporting.max_history, config.reporting.console_logging
    );
    Ok(())
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let (config_path, config) = load_config(cli)?;
    info!(path = %config_path.display(), "Starting Beacon");

    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let _enter = runtime.enter();

    let mut app = App::new(&config, runtime.handle().clone());
    app.run().map_err(|e| anyhow::anyhow!("{e}"))
}

/// Install a panic hook that restores the terminal before printing the panic message.
fn install_panic_hook() {
    let original_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let _ = restore_terminal();
        original_hook(panic_info);
    }));
}

/// Restore terminal to its normal state.
fn restore_terminal() -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    let _ = crossterm::terminal::disable_raw_mode();
    crossterm::execute!(
        stdout,
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    stdout.flush()?;
    Ok(())
}

/// Console and file logging for `--check-config`; file-only for the
/// dashboard, where the alternate screen leaves no room for console output.
fn setup_logging(cli: &Cli) -> beacon_core::Result<LogGuard> {
    if cli.check_config {
        init_logging(cli.log_dir.clone(), cli.verbose > 0)
    } else {
        init_file_logging(cli.log_dir.clone(), cli.verbose > 0)
    }
}
