use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::RelayConfig;
use crate::constants::PASSWORD_ENV_VAR;

/// Command-line arguments for the lapse-relay tool.
///
/// Every remote option overrides the matching entry of the configuration
/// file given with `--config`.
#[derive(Parser, Debug)]
#[clap(name = "lapse-relay", about = "Relay captured files to an SFTP server in the background")]
pub struct Args {
    /// Files to upload
    pub files: Vec<PathBuf>,

    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// SFTP server hostname
    #[clap(long)]
    pub host: Option<String>,

    /// SFTP server port
    #[clap(long)]
    pub port: Option<u16>,

    /// Username for authentication
    #[clap(short, long)]
    pub user: Option<String>,

    /// Password for authentication
    #[clap(long, env = PASSWORD_ENV_VAR, hide_env_values = true)]
    pub password: Option<String>,

    /// Path to private key file for authentication
    #[clap(long)]
    pub key: Option<PathBuf>,

    /// Remote directory for uploaded files
    #[clap(short = 'r', long)]
    pub remote_path: Option<String>,

    /// Upload into a per-run directory named after the start time
    #[clap(long)]
    pub timestamp_dir: bool,

    /// Delete local files after a successful upload
    #[clap(long)]
    pub delete_local: bool,

    /// Pause after failed uploads, starting at this many milliseconds
    #[clap(long)]
    pub retry_base_ms: Option<u64>,

    /// Upper bound for the pause after failed uploads (in milliseconds)
    #[clap(long, requires = "retry_base_ms")]
    pub retry_max_ms: Option<u64>,

    /// Read further file paths from stdin, one per line, until EOF
    #[clap(long)]
    pub stdin: bool,

    /// Write the log to this file in addition to the terminal
    #[clap(short = 'l', long)]
    pub log_file: Option<PathBuf>,

    /// Upload the log file after all other files
    #[clap(long, requires = "log_file")]
    pub upload_log: bool,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Log level (overrides --verbose)
    #[clap(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

/// Log levels selectable on the command line.
#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq)]
pub enum LogLevel {
    None,
    Info,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::None => write!(f, "none"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Debug => write!(f, "debug"),
        }
    }
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect, create the remote directory and probe the session
    Check,
}

impl Args {
    pub fn effective_log_level(&self) -> LogLevel {
        match self.log_level {
            Some(level) => level,
            None if self.verbose => LogLevel::Debug,
            None => LogLevel::Info,
        }
    }

    /// Apply command-line overrides on top of a loaded configuration
    pub fn apply_to(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(user) = &self.user {
            config.username = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(key) = &self.key {
            config.private_key = Some(key.clone());
        }
        if let Some(remote_path) = &self.remote_path {
            config.remote_path = remote_path.clone();
        }
        if self.delete_local {
            config.delete_local = true;
        }
        if let Some(base) = self.retry_base_ms {
            let mut retry = config.retry.clone().unwrap_or_default();
            retry.base_delay_ms = base;
            if let Some(max) = self.retry_max_ms {
                retry.max_delay_ms = max;
            }
            config.retry = Some(retry);
        }
    }
}
