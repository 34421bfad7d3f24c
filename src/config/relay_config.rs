use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::cloud::{Credentials, RemoteTarget};
use crate::constants::{
    DEFAULT_CONNECTION_TIMEOUT_SECS, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_SECS, SFTP_DEFAULT_PORT,
};
use crate::worker::{RetryPolicy, WorkerOptions};

/// Retry pacing as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    RETRY_BASE_DELAY_MS
}

fn default_max_delay_ms() -> u64 {
    RETRY_MAX_DELAY_SECS * 1000
}

fn default_port() -> u16 {
    SFTP_DEFAULT_PORT
}

fn default_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms.max(config.base_delay_ms)),
        }
    }
}

/// Relay configuration.
///
/// Loaded from YAML and then overridden by command-line flags:
///
/// ```yaml
/// host: nas.local
/// port: 22
/// username: pi
/// private_key: /home/pi/.ssh/id_ed25519
/// remote_path: timelapse
/// delete_local: true
/// retry:
///   base_delay_ms: 500
///   max_delay_ms: 60000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default)]
    pub delete_local: bool,
    #[serde(default = "default_timeout")]
    pub connection_timeout_sec: u64,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: None,
            password: None,
            private_key: None,
            remote_path: String::new(),
            delete_local: false,
            connection_timeout_sec: default_timeout(),
            retry: None,
        }
    }
}

impl RelayConfig {
    /// Load a configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        info!("Loaded relay configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Invalid relay configuration")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize relay configuration")
    }

    /// Check that the configuration describes a usable remote target
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("No remote host configured"));
        }
        if self.remote_path.trim().is_empty() {
            return Err(anyhow!("No remote path configured"));
        }
        if self.port == 0 {
            return Err(anyhow!("Invalid remote port: 0"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(anyhow!("A password was given without a username"));
        }
        if let Some(key) = &self.private_key {
            if !key.exists() {
                return Err(anyhow!("Private key not found: {}", key.display()));
            }
        }
        Ok(())
    }

    /// Build the remote target, optionally below a per-run directory
    pub fn to_target(&self, run_dir: Option<&str>) -> RemoteTarget {
        let credentials = self.username.as_ref().map(|user| {
            let mut credentials = Credentials::new(user.clone());
            credentials.password = self.password.clone();
            credentials.private_key = self.private_key.clone();
            credentials
        });

        let mut target = RemoteTarget::new(self.host.clone(), self.remote_path.clone()).with_port(self.port);
        target.credentials = credentials;

        match run_dir {
            Some(dir) => {
                debug!("Uploading below run directory {}", dir);
                target.with_run_dir(dir)
            }
            None => target,
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            delete_local: self.delete_local,
            retry: self.retry.as_ref().map(RetryPolicy::from),
        }
    }
}

/// Load the configuration file if one was given, otherwise start from defaults
pub fn load_or_default(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => RelayConfig::from_file(path),
        None => Ok(RelayConfig::default()),
    }
}
