//! Background upload worker.
//!
//! The producer hands file paths to a [`WorkerHandle`]; a dedicated thread
//! drains them through a [`WorkQueue`] into a remote sink.
//!
//! ```no_run
//! use lapse_relay::cloud::RemoteTarget;
//! use lapse_relay::cloud::sftp::SftpSink;
//! use lapse_relay::worker::{UploadWorker, WorkQueue, WorkerOptions};
//!
//! # fn example() -> anyhow::Result<()> {
//! let target = RemoteTarget::new("nas.local", "timelapse");
//! let worker = UploadWorker::new(SftpSink::default(), target, WorkQueue::new(), WorkerOptions::default());
//! let mut handle = worker.start()?;
//!
//! handle.add_work("/home/pi/piLapse/image_001.jpg");
//! handle.stop_worker();
//! let report = handle.await_completion()?;
//! println!("Uploaded {} files", report.files_uploaded);
//! # Ok(())
//! # }
//! ```

/// Work queue shared by producer and worker
pub mod queue;

/// Upload worker run loop and producer handle
pub mod upload_worker;

pub use queue::{QueueItem, WorkQueue};
pub use upload_worker::{
    RetryPolicy, UploadWorker, WorkerError, WorkerHandle, WorkerOptions, WorkerProgress,
    WorkerReport, WorkerState,
};
