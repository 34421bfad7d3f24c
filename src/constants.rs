//! Global constants for the lapse-relay application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Remote connection constants
/// Default SFTP port
pub const SFTP_DEFAULT_PORT: u16 = 22;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// User name tried when no credentials are configured
pub const ANONYMOUS_USER: &str = "anonymous";

/// Permissions for remote directories created by the worker
pub const REMOTE_DIR_MODE: i32 = 0o755;

/// Buffer size for streaming a local file to the remote side (256KB)
pub const STREAMING_BUFFER_SIZE: usize = 256 * 1024;

// libssh2 session error codes that mean the transport is gone
pub const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
pub const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
pub const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

// SFTP status codes that mean the transport is gone
pub const LIBSSH2_FX_NO_CONNECTION: i32 = 6;
pub const LIBSSH2_FX_CONNECTION_LOST: i32 = 7;

// Retry constants
/// Base retry delay in milliseconds when pacing is enabled
pub const RETRY_BASE_DELAY_MS: u64 = 250;

/// Maximum retry delay in seconds when pacing is enabled
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

// Worker constants
/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "upload-worker";

/// Format of the per-run remote directory
pub const RUN_DIR_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Environment variable holding the remote password
pub const PASSWORD_ENV_VAR: &str = "LAPSE_RELAY_PASSWORD";

// Error messages
pub const ERROR_FAILED_TO_CREATE_SESSION: &str = "Failed to create SSH session";
pub const ERROR_FAILED_TO_CREATE_SFTP: &str = "Failed to create SFTP subsystem";
pub const ERROR_AUTHENTICATION_FAILED: &str = "Authentication failed";
