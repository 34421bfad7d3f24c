use std::fs::OpenOptions;
use std::io::{self, BufRead};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Parser;
use log::{debug, info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, Config, SharedLogger, TermLogger, TerminalMode, WriteLogger};

use lapse_relay::cli::{Args, Commands, LogLevel};
use lapse_relay::cloud::sftp::SftpSink;
use lapse_relay::cloud::{Health, RemoteSession, RemoteSink};
use lapse_relay::config::{load_or_default, RelayConfig};
use lapse_relay::constants::RUN_DIR_FORMAT;
use lapse_relay::worker::{UploadWorker, WorkQueue, WorkerHandle};

fn main() -> Result<()> {
    let args = Args::parse();

    initialize_logging(args.effective_log_level(), args.log_file.as_deref())?;

    let config = load_and_apply_config(&args)?;

    if let Some(cmd) = &args.command {
        return handle_subcommand(cmd, &config);
    }

    run_relay(&args, &config)
}

/// Initialize terminal logging, plus a log file when one was requested
fn initialize_logging(level: LogLevel, log_file: Option<&Path>) -> Result<()> {
    let filter = match level {
        LogLevel::None => return Ok(()),
        LogLevel::Info => LevelFilter::Info,
        LogLevel::Debug => LevelFilter::Debug,
    };

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        filter,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        loggers.push(WriteLogger::new(filter, Config::default(), file));
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")?;
    Ok(())
}

/// Load the configuration file and apply command-line overrides
fn load_and_apply_config(args: &Args) -> Result<RelayConfig> {
    let mut config = load_or_default(args.config.as_deref())?;
    args.apply_to(&mut config);
    config.validate().context("Invalid relay configuration")?;
    Ok(config)
}

fn handle_subcommand(cmd: &Commands, config: &RelayConfig) -> Result<()> {
    match cmd {
        Commands::Check => check_remote(config),
    }
}

/// Open a session, create the remote directory and probe it once
fn check_remote(config: &RelayConfig) -> Result<()> {
    let target = config.to_target(None);
    info!("Checking remote target {}", target.display_url());
    debug!("Resolved configuration:\n{}", config.to_yaml()?);

    let mut sink = SftpSink::new(config.connection_timeout_sec);
    let mut session = sink
        .connect(&target)
        .with_context(|| format!("Failed to connect to {}", target.display_url()))?;

    session
        .ensure_directory(&target.remote_path)
        .context("Failed to prepare remote directory")?;

    match session.health_check().context("Session probe failed")? {
        Health::Healthy => {
            info!("Remote target is ready: {}", target.display_url());
            Ok(())
        }
        Health::Stale => Err(anyhow!("Remote session closed right after connecting")),
    }
}

/// Relay every requested file through a background upload worker
fn run_relay(args: &Args, config: &RelayConfig) -> Result<()> {
    let run_dir = args
        .timestamp_dir
        .then(|| Local::now().format(RUN_DIR_FORMAT).to_string());
    let target = config.to_target(run_dir.as_deref());
    info!("Relaying files to {}", target.display_url());

    let sink = SftpSink::new(config.connection_timeout_sec);
    let mut handle = UploadWorker::new(sink, target, WorkQueue::new(), config.worker_options())
        .start()
        .context("Failed to start upload worker")?;

    for file in &args.files {
        handle.add_work(file.clone());
    }

    if args.stdin {
        let queued = enqueue_lines(&handle, io::stdin().lock());
        info!("Queued {} file(s) from stdin", queued);
    }

    if args.upload_log {
        if let Some(log_file) = &args.log_file {
            info!("Queueing log file ({})", log_file.display());
            log::logger().flush();
            handle.add_work(log_file.clone());
        }
    }

    handle.stop_worker();
    let report = handle
        .await_completion()
        .context("Upload worker did not finish its queue")?;

    info!(
        "Relay completed: {} file(s) uploaded, {} bytes",
        report.files_uploaded, report.bytes_uploaded
    );
    if report.failed_attempts > 0 {
        warn!("{} upload attempt(s) failed and were retried", report.failed_attempts);
    }
    if report.deletion_failures > 0 {
        warn!("{} uploaded file(s) could not be deleted locally", report.deletion_failures);
    }

    Ok(())
}

/// Queue one path per non-empty line until EOF or a read error
fn enqueue_lines<R: BufRead>(handle: &WorkerHandle, reader: R) -> usize {
    let mut queued = 0;
    for line in reader.lines() {
        match line {
            Ok(line) => {
                let path = line.trim();
                if path.is_empty() {
                    continue;
                }
                handle.add_work(path);
                queued += 1;
            }
            Err(e) => {
                warn!("Stopped reading paths from stdin: {}", e);
                break;
            }
        }
    }
    queued
}
