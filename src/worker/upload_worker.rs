use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;

use super::queue::{QueueItem, WorkQueue};
use crate::cloud::{Health, RemoteSession, RemoteSink, RemoteTarget, SinkError};
use crate::constants::{RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_SECS, WORKER_THREAD_NAME};
use crate::security::redact_secret;

/// Lifecycle of an upload worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Running,
    Draining,
    Stopped,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Connecting => 0,
            WorkerState::Running => 1,
            WorkerState::Draining => 2,
            WorkerState::Stopped => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Connecting,
            1 => WorkerState::Running,
            2 => WorkerState::Draining,
            _ => WorkerState::Stopped,
        }
    }
}

/// Pacing between retries of failed uploads.
///
/// Without a policy failed items are retried as soon as they come back to
/// the front of the queue. With one, the worker sleeps after every failure,
/// doubling the delay for each consecutive failure up to `max_delay`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_secs(RETRY_MAX_DELAY_SECS),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `consecutive_failures`-th failure in a row (1-based).
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }
}

/// Behaviour switches for an upload worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Delete local files once they have been stored remotely.
    pub delete_local: bool,
    pub retry: Option<RetryPolicy>,
}

/// Counters describing what a worker did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
    /// Failed attempts that put the file back into the queue.
    pub failed_attempts: u64,
    pub reconnects: u64,
    /// Times the termination marker was pushed back behind pending work.
    pub deferrals: u64,
    pub deletion_failures: u64,
}

/// Progress shared between the worker thread and its handle.
#[derive(Debug, Default)]
pub struct WorkerProgress {
    state: AtomicU8,
    files_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    failed_attempts: AtomicU64,
    reconnects: AtomicU64,
    deferrals: AtomicU64,
    deletion_failures: AtomicU64,
}

impl WorkerProgress {
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> WorkerReport {
        WorkerReport {
            files_uploaded: self.files_uploaded.load(Ordering::SeqCst),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::SeqCst),
            failed_attempts: self.failed_attempts.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
            deferrals: self.deferrals.load(Ordering::SeqCst),
            deletion_failures: self.deletion_failures.load(Ordering::SeqCst),
        }
    }
}

/// Errors surfaced to the producer by [`WorkerHandle::await_completion`].
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("upload worker aborted: {0}")]
    Aborted(#[from] SinkError),

    #[error("upload worker thread panicked")]
    Panicked,

    #[error("failed to spawn upload worker thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Drains a [`WorkQueue`] into a remote sink over a single session.
///
/// Every file is attempted until it is stored. Failed files go to the back
/// of the queue; the termination marker is pushed back as long as anything
/// else is queued, so the run loop only returns once the queue is drained.
pub struct UploadWorker<S: RemoteSink> {
    sink: S,
    target: RemoteTarget,
    queue: WorkQueue,
    options: WorkerOptions,
    progress: Arc<WorkerProgress>,
    consecutive_failures: u32,
}

impl<S: RemoteSink> UploadWorker<S> {
    pub fn new(sink: S, target: RemoteTarget, queue: WorkQueue, options: WorkerOptions) -> Self {
        Self {
            sink,
            target,
            queue,
            options,
            progress: Arc::new(WorkerProgress::default()),
            consecutive_failures: 0,
        }
    }

    pub fn progress(&self) -> Arc<WorkerProgress> {
        Arc::clone(&self.progress)
    }

    /// Run the worker on the calling thread until the queue is drained.
    ///
    /// Returns an error only for fatal sink errors: authentication, an
    /// unreachable host, or a remote directory that cannot be created.
    pub fn run(mut self) -> Result<WorkerReport, SinkError> {
        info!("Upload worker started ({})", self.target.display_url());

        let result = self.drain();
        self.progress.set_state(WorkerState::Stopped);

        match result {
            Ok(()) => {
                let report = self.progress.snapshot();
                info!(
                    "Upload worker finished: {} file(s), {} bytes, {} failed attempt(s), {} reconnect(s)",
                    report.files_uploaded, report.bytes_uploaded, report.failed_attempts, report.reconnects
                );
                Ok(report)
            }
            Err(e) => {
                error!("Upload worker aborted: {}", self.describe(&e));
                Err(e)
            }
        }
    }

    fn drain(&mut self) -> Result<(), SinkError> {
        let mut session = Some(self.open_session()?);
        self.progress.set_state(WorkerState::Running);

        while let Some(item) = self.queue.dequeue() {
            match item {
                QueueItem::Terminate => {
                    self.progress.set_state(WorkerState::Draining);
                    if self.queue.is_empty() {
                        return Ok(());
                    }
                    debug!(
                        "Termination requested with {} item(s) pending, deferring",
                        self.queue.len()
                    );
                    self.progress.deferrals.fetch_add(1, Ordering::SeqCst);
                    self.queue.enqueue(QueueItem::Terminate);
                    self.progress.set_state(WorkerState::Running);
                }
                QueueItem::File(path) => self.process(&mut session, path)?,
            }
        }

        warn!("Work queue disconnected before termination was requested");
        Ok(())
    }

    /// Connect and make the remote base directory current.
    fn open_session(&mut self) -> Result<S::Session, SinkError> {
        self.progress.set_state(WorkerState::Connecting);
        let mut session = self.sink.connect(&self.target)?;
        session.ensure_directory(&self.target.remote_path)?;
        debug!("Initialized remote session ({})", self.target.display_url());
        Ok(session)
    }

    fn process(&mut self, session: &mut Option<S::Session>, path: PathBuf) -> Result<(), SinkError> {
        debug!("Uploading file ({})", path.display());

        match self.upload(session, &path) {
            Ok(bytes) => {
                self.consecutive_failures = 0;
                self.progress.files_uploaded.fetch_add(1, Ordering::SeqCst);
                self.progress.bytes_uploaded.fetch_add(bytes, Ordering::SeqCst);
                debug!("Successfully uploaded file ({})", path.display());

                if self.options.delete_local {
                    self.delete_local_file(&path);
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                if e.is_stale() {
                    *session = None;
                }
                error!("Error uploading local file ({}): {}", path.display(), self.describe(&e));
                self.progress.failed_attempts.fetch_add(1, Ordering::SeqCst);
                self.queue.enqueue(QueueItem::File(path));
                self.pause_after_failure();
                Ok(())
            }
        }
    }

    /// One upload attempt: probe the session, reconnect if needed, store.
    fn upload(&mut self, slot: &mut Option<S::Session>, path: &Path) -> Result<u64, SinkError> {
        let stale = match slot.as_mut() {
            Some(session) => session.health_check()? == Health::Stale,
            None => true,
        };

        if stale {
            info!("Remote session is stale, reconnecting");
            *slot = None;
            *slot = Some(self.open_session()?);
            self.progress.set_state(WorkerState::Running);
            self.progress.reconnects.fetch_add(1, Ordering::SeqCst);
        }

        match slot.as_mut() {
            Some(session) => session.store(path),
            None => Err(SinkError::Stale),
        }
    }

    fn delete_local_file(&self, path: &Path) {
        match fs::remove_file(path) {
            Ok(()) => debug!("Deleted local file ({})", path.display()),
            Err(e) => {
                error!("Error deleting local file ({}): {}", path.display(), e);
                self.progress.deletion_failures.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn pause_after_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if let Some(policy) = self.options.retry {
            let delay = policy.delay_for(self.consecutive_failures);
            debug!("Pausing {:?} before the next upload", delay);
            thread::sleep(delay);
        }
    }

    fn describe(&self, err: &SinkError) -> String {
        let password = self
            .target
            .credentials
            .as_ref()
            .and_then(|c| c.password.as_deref());
        redact_secret(&err.to_string(), password)
    }
}

impl<S> UploadWorker<S>
where
    S: RemoteSink + Send + 'static,
{
    /// Spawn the worker thread. The thread connects before draining work;
    /// a connection failure surfaces from [`WorkerHandle::await_completion`].
    pub fn start(self) -> Result<WorkerHandle, WorkerError> {
        let queue = self.queue.clone();
        let progress = self.progress();

        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || self.run())
            .map_err(WorkerError::Spawn)?;

        Ok(WorkerHandle {
            queue,
            progress,
            thread: Some(thread),
            stop_sent: false,
        })
    }
}

/// Producer-side handle to a running upload worker.
pub struct WorkerHandle {
    queue: WorkQueue,
    progress: Arc<WorkerProgress>,
    thread: Option<JoinHandle<Result<WorkerReport, SinkError>>>,
    stop_sent: bool,
}

impl WorkerHandle {
    /// Queue a file for upload. Never blocks.
    pub fn add_work(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        if self.stop_sent {
            warn!("File queued after stop was requested ({})", path.display());
        }
        self.queue.enqueue(QueueItem::File(path));
    }

    /// Ask the worker to exit once everything queued has been uploaded.
    ///
    /// Only the first call sends the termination marker.
    pub fn stop_worker(&mut self) {
        if self.stop_sent {
            warn!("Upload worker was already asked to stop");
            return;
        }
        self.stop_sent = true;
        self.queue.enqueue(QueueItem::Terminate);
    }

    /// Block until the worker thread has exited.
    pub fn await_completion(mut self) -> Result<WorkerReport, WorkerError> {
        if !self.stop_sent {
            warn!("Waiting for the upload worker without a stop request");
        }

        let thread = match self.thread.take() {
            Some(thread) => thread,
            None => return Ok(self.progress.snapshot()),
        };

        match thread.join() {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(WorkerError::Aborted(e)),
            Err(_) => Err(WorkerError::Panicked),
        }
    }

    pub fn state(&self) -> WorkerState {
        self.progress.state()
    }

    pub fn progress(&self) -> WorkerReport {
        self.progress.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            warn!("Upload worker handle dropped without awaiting completion");
        }
    }
}
