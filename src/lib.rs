//! # lapse-relay
//!
//! Background relay that ships captured files to an SFTP server while the
//! capture loop keeps running.
//!
//! ## Overview
//!
//! A producer (a timelapse capture loop, a shell pipeline, the bundled CLI)
//! hands local file paths to a [`worker::WorkerHandle`]. A single worker
//! thread drains them in FIFO order through one long-lived remote session,
//! reconnects when the session goes stale and re-enqueues any file whose
//! transfer fails. Once the producer signals stop, the worker finishes the
//! backlog and exits.
//!
//! ## Usage
//!
//! ```no_run
//! use lapse_relay::cloud::{Credentials, RemoteTarget};
//! use lapse_relay::cloud::sftp::SftpSink;
//! use lapse_relay::worker::{UploadWorker, WorkQueue, WorkerOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let target = RemoteTarget::new("nas.local", "timelapse")
//!     .with_credentials(Credentials::new("pi").with_private_key("/home/pi/.ssh/id_ed25519"));
//!
//! let options = WorkerOptions {
//!     delete_local: true,
//!     ..Default::default()
//! };
//! let mut handle = UploadWorker::new(SftpSink::default(), target, WorkQueue::new(), options).start()?;
//!
//! for i in 0..3 {
//!     handle.add_work(format!("/home/pi/piLapse/image{:05}.jpg", i));
//! }
//!
//! handle.stop_worker();
//! let report = handle.await_completion()?;
//! println!("Uploaded {} files ({} bytes)", report.files_uploaded, report.bytes_uploaded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`worker`]: work queue, upload worker state machine and producer handle
//! - [`cloud`]: remote sink abstraction and the SFTP implementation
//! - [`config`]: YAML relay configuration
//! - [`security`]: credential scrubbing for log output
//! - [`cli`]: command-line interface of the `lapse-relay` binary

pub mod cli;
pub mod cloud;
pub mod config;
pub mod constants;
pub mod security;
pub mod worker;

#[cfg(test)]
pub mod test_utils;
