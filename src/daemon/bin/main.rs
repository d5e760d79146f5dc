extern crate shutterd;

use anyhow::{Context, Result};
use log::{error, info, warn};
use shutterd::config::Config;
use shutterd::daemon::cli;
use shutterd::daemon::command::CaptureCommand;
use shutterd::daemon::signal::setup_signal_handlers;
use shutterd::daemon::trigger::TriggerCadence;
use shutterd::daemon::Core;
use shutterd::detach::detach_tty;
use shutterd::logger::{self, mask_from_str, LogSink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() {
    if let Err(e) = run() {
        error!("Startup failed: {:#}", e);
        eprintln!("shutterd: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = cli::cli_app()?;

    if cli.detach_tty {
        detach_tty(std::env::args());
    }

    let config = Arc::new(
        Config::from_path(&cli.config_path)
            .with_context(|| "Could not load configuration")?,
    );

    if cli.dump_config {
        config.dump();
    }

    let sink = Arc::new(build_sink(&config, cli.log_file.as_deref())?);
    logger::init(Arc::clone(&sink))
        .with_context(|| "Failed to install logger")?;

    warn!("Started shutterd with config {}", config.path().display());

    // Consumed once here; not hot-reloaded by SIGUSR2.
    let cadence = TriggerCadence::from_config(&config)?;
    let command = CaptureCommand::from_settings(&config.snapshot())?;

    let core = Arc::new(Core::new(Arc::clone(&config), sink));

    if let Err(e) = core.pid_file().write() {
        info!(
            "Failed to write PID file {}: {}",
            core.pid_file().path().display(),
            e
        );
    }

    // Installed before the fork so an early child exit is still reaped.
    setup_signal_handlers(Arc::clone(&core))
        .map_err(|e| anyhow::anyhow!("Failed to set up signal handlers: {}", e))?;

    let fifo = fifo_path(&config);
    let handle = match core
        .supervisor()
        .spawn(&command, fifo.as_deref())
    {
        Ok(handle) => handle,
        Err(e) => {
            core.shutdown();
            return Err(e).with_context(|| "Could not start capture process");
        }
    };

    // The handoff has completed, so the trigger loop can never signal an
    // unknown PID.
    if let Err(e) = core.trigger().start(cadence, handle) {
        core.shutdown();
        return Err(e.into());
    }

    // Idle until a terminating signal (handled on the dispatch thread) or
    // an internal shutdown request ends the daemon.
    while !core.flag().is_requested() {
        std::thread::sleep(Duration::from_secs(5));
    }

    core.shutdown();
    Ok(())
}

fn build_sink(config: &Config, log_file: Option<&Path>) -> Result<LogSink> {
    let mask = mask_from_str(&config.get_str("log.level"));
    let filename = config.get_str("log.filename");

    let path = log_file
        .map(Path::to_path_buf)
        .or_else(|| {
            if filename.is_empty() {
                None
            } else {
                Some(PathBuf::from(filename))
            }
        });

    match path {
        Some(path) => LogSink::with_file(&path, mask).with_context(|| {
            format!("Could not open log file {}", path.display())
        }),
        None => Ok(LogSink::new(mask)),
    }
}

fn fifo_path(config: &Config) -> Option<PathBuf> {
    let path = config.get_str("daemon.handoff_fifo");
    if path.is_empty() {
        None
    } else {
        Some(PathBuf::from(path))
    }
}
