use std::path::{Path, PathBuf};

use crossbeam::channel::{self, Receiver, Sender};

/// An entry in the work queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueItem {
    /// A local file ready for transfer.
    File(PathBuf),
    /// No new work follows. Deferred by the worker until the queue is empty.
    Terminate,
}

impl QueueItem {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        QueueItem::File(path.into())
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            QueueItem::File(path) => Some(path),
            QueueItem::Terminate => None,
        }
    }
}

/// Unbounded FIFO channel shared by the producer and the upload worker.
///
/// Clones refer to the same channel. Enqueueing never blocks; dequeueing
/// blocks until an item is available.
#[derive(Clone, Debug)]
pub struct WorkQueue {
    sender: Sender<QueueItem>,
    receiver: Receiver<QueueItem>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self { sender, receiver }
    }

    /// Append an item at the back of the queue.
    pub fn enqueue(&self, item: QueueItem) {
        // Both channel ends live inside `self`, so the channel cannot be
        // disconnected while we hold it.
        let _ = self.sender.send(item);
    }

    /// Block until an item is available and remove it from the front.
    ///
    /// Returns `None` only if the channel has been disconnected, which
    /// cannot happen while this queue is alive.
    pub fn dequeue(&self) -> Option<QueueItem> {
        self.receiver.recv().ok()
    }

    /// Remove the front item if there is one, without blocking.
    pub fn try_dequeue(&self) -> Option<QueueItem> {
        self.receiver.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}
