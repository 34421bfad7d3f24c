//! Remote storage integration for relayed files.
//!
//! This module hides the remote protocol's session and directory semantics
//! behind two traits. A [`RemoteSink`] knows how to open a session for a
//! [`RemoteTarget`]; the resulting [`RemoteSession`] is the connection handle
//! the upload worker owns exclusively.
//!
//! ## Supported Providers
//!
//! - **SFTP**: Secure file transfer to any SSH/SFTP server ([`sftp`])
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │    Producer     │────▶│   Work Queue    │────▶│  Upload Worker  │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                                 ┌────────▼────────┐
//!                                                 │  RemoteSession  │
//!                                                 └────────┬────────┘
//!                                                          │
//!                                                 ┌────────▼────────┐
//!                                                 │   SFTP Server   │
//!                                                 └─────────────────┘
//! ```
//!
//! ## Error classes
//!
//! [`SinkError::is_fatal`] separates errors that abort the worker
//! (authentication, unreachable host, directory creation) from per-item
//! failures that are retried. A closed session is reported as
//! [`Health::Stale`] by the probe or [`SinkError::Stale`] by a transfer, so
//! the worker never has to look at protocol error codes.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::constants::SFTP_DEFAULT_PORT;
use crate::security::scrub_credentials;

/// SFTP configuration and session implementation
pub mod sftp;

/// Errors produced by remote sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("authentication failed for {user}@{host}: {reason}")]
    Auth {
        user: String,
        host: String,
        reason: String,
    },

    #[error("failed to connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("failed to create remote directory {path}: {reason}")]
    Directory { path: String, reason: String },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("remote session is stale")]
    Stale,

    #[error("cannot read local file {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SinkError {
    /// Errors that make the remote target unusable for the rest of the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SinkError::Auth { .. } | SinkError::Connect { .. } | SinkError::Directory { .. }
        )
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, SinkError::Stale)
    }
}

/// Result of a session health probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Health {
    Healthy,
    /// The remote end closed the session, usually after an idle timeout.
    Stale,
}

/// Login data for the remote side.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
}

impl Credentials {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            private_key: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_private_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key = Some(path.into());
        self
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<REDACTED>"))
            .field("private_key", &self.private_key)
            .finish()
    }
}

/// Where relayed files end up.
///
/// Immutable for a worker's lifetime. `remote_path` may be nested; every
/// missing segment is created when the session is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
    pub remote_path: String,
}

impl RemoteTarget {
    pub fn new(host: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: SFTP_DEFAULT_PORT,
            credentials: None,
            remote_path: remote_path.into(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Append a per-run directory below the base remote path.
    pub fn with_run_dir(mut self, run_dir: &str) -> Self {
        let base = self.remote_path.trim_end_matches('/');
        self.remote_path = if base.is_empty() && self.remote_path.starts_with('/') {
            format!("/{}", run_dir)
        } else if base.is_empty() {
            run_dir.to_string()
        } else {
            format!("{}/{}", base, run_dir)
        };
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Printable form, e.g. `sftp://pi@nas.local:22/timelapse`.
    pub fn display_url(&self) -> String {
        let user = self
            .credentials
            .as_ref()
            .map(|c| format!("{}@", c.username))
            .unwrap_or_default();
        let path = if self.remote_path.starts_with('/') {
            self.remote_path.clone()
        } else {
            format!("/{}", self.remote_path)
        };
        scrub_credentials(&format!("sftp://{}{}:{}{}", user, self.host, self.port, path))
    }
}

/// Connector for a remote storage endpoint.
#[cfg_attr(test, automock(type Session = MockRemoteSession;))]
pub trait RemoteSink {
    type Session: RemoteSession;

    /// Authenticate and open a new session.
    ///
    /// Fails with [`SinkError::Auth`] or [`SinkError::Connect`].
    fn connect(&mut self, target: &RemoteTarget) -> Result<Self::Session, SinkError>;
}

/// An open, authenticated session. This is the worker's connection handle.
#[cfg_attr(test, automock)]
pub trait RemoteSession {
    /// Create `path` segment by segment and make it the working directory.
    ///
    /// Segments that already exist are not an error.
    fn ensure_directory(&mut self, path: &str) -> Result<(), SinkError>;

    /// Stream `local_file` into the working directory under its base name.
    /// Returns the number of bytes written.
    fn store(&mut self, local_file: &Path) -> Result<u64, SinkError>;

    /// No-op round trip.
    fn health_check(&mut self) -> Result<Health, SinkError>;
}
