//! ptproxy - Pluggable Transport Helper
//!
//! This is the main entry point for the ptproxy application.

use anyhow::{Context, Result};
use clap::Parser;
use ptproxy::config::{load_config, Config, Mode};
use ptproxy::{run_client, run_server, PtProxyError};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::FmtSubscriber;

/// ptproxy - Relay TCP connections to a bridge through a pluggable transport
#[derive(Parser, Debug)]
#[command(name = "ptproxy")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging format
    #[arg(long)]
    json_log: bool,

    /// Also append log output to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = setup_logging(&args.log_level, args.json_log, args.log_file.as_ref()) {
        eprintln!("Failed to set up logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    info!("ptproxy v{}", ptproxy::VERSION);

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("config failed: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    info!("Configuration loaded from: {:?}", args.config);

    match run(config).await {
        Ok(()) => {
            info!("ptproxy stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{} failed: {}", e.stage(), e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), PtProxyError> {
    let mode = config.mode().map_err(PtProxyError::Config)?;
    info!("Transport: {} ({:?})", config.transport.name, config.transport.binary);

    // Setup shutdown signal
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    // Handle Ctrl+C and termination signals (cross-platform)
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(true);
    });

    match mode {
        Mode::Client => run_client(config, shutdown_rx).await,
        Mode::Server => run_server(config, shutdown_rx).await,
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!("Failed to setup SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    // On Windows, only handle Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down...");
}

/// Setup logging based on command line flags
fn setup_logging(level: &str, json: bool, log_file: Option<&PathBuf>) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let writer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {:?}", path))?;
            BoxMakeWriter::new(std::io::stdout.and(Mutex::new(file)))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    if json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(writer)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(())
}
