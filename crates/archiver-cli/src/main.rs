mod cli;
mod dispatch;
mod logrotate;
mod signal;

use std::panic::AssertUnwindSafe;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use archiver_core::config::Config;
use archiver_core::error::ArchiverError;
use archiver_core::lock::{FileLock, LockWatcher};
use archiver_core::shutdown;

use cli::Cli;

const EXIT_UNEXPECTED_ERROR: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

fn main() {
    std::process::exit(real_main());
}

fn real_main() -> i32 {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config_file) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return dispatch::EXIT_ERROR;
        }
    };
    if let Err(e) = std::fs::create_dir_all(&config.app.work_dir) {
        eprintln!(
            "Error: cannot create work directory '{}': {e}",
            config.app.work_dir.display()
        );
        return dispatch::EXIT_ERROR;
    }

    if let Err(e) = setup_logging(&config, cli.verbose) {
        eprintln!("Error: failed to configure logging: {e}");
        return dispatch::EXIT_ERROR;
    }

    info!("Run record archiver starting (config: {})", cli.config_file.display());
    signal::install_signal_handlers();

    let lock = match FileLock::acquire(&config.app.lock_file()) {
        Ok(lock) => lock,
        Err(e @ ArchiverError::LockHeld { .. }) => {
            warn!("{e}");
            return dispatch::EXIT_ERROR;
        }
        Err(e) => {
            error!("Failed to acquire lock: {e}");
            return dispatch::EXIT_ERROR;
        }
    };
    let watcher = LockWatcher::start(lock.path());

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| dispatch::run_mode(&config, &cli)));

    watcher.stop();
    drop(lock);

    match result {
        Ok(Ok(code)) => {
            if shutdown::shutdown_requested() {
                let reason = shutdown::shutdown_reason()
                    .unwrap_or_else(|| "User interrupt".to_string());
                warn!("Graceful shutdown completed (reason: {reason})");
                EXIT_INTERRUPTED
            } else if code == dispatch::EXIT_SUCCESS {
                info!("Execution completed successfully");
                code
            } else {
                warn!("Execution completed with failures (exit code: {code})");
                code
            }
        }
        Ok(Err(e)) => {
            error!("Error: {e}");
            dispatch::EXIT_ERROR
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Unexpected error: {message}");
            EXIT_UNEXPECTED_ERROR
        }
    }
}

fn setup_logging(config: &Config, verbose: bool) -> std::io::Result<()> {
    let level = if verbose {
        "debug".to_string()
    } else {
        config.app.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| {
        eprintln!("Invalid log level '{level}', defaulting to info");
        EnvFilter::new("info")
    });

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);

    match &config.app.log_file {
        Some(log_file) => {
            let writer = logrotate::RollingFileWriter::new(log_file)?;
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(logrotate::RollingMakeWriter::new(writer));
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
    Ok(())
}
