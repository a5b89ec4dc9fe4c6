//! Stream registry for tracking open transfers
//!
//! Maps each `StreamHandle` to a shared `StreamEntry`. The entry does not
//! hold the sink itself: the sink is owned by the task driving the
//! transfer, and the entry carries the channels that reach that task.
//! Writes travel through a bounded inbox and close requests through a
//! oneshot taken at most once, so only the owning task ever touches the
//! sink.
//!
//! The map is sharded (`DashMap`), so operations on different handles do
//! not contend on a single lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use relay_common::StreamHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use super::{StreamDirection, StreamState};
use crate::error::RelayError;
use crate::transfers::{ProgressSnapshot, TransferProgress};

/// A chunk queued for an upload and the channel its result is reported on
pub struct PendingWrite {
    pub data: Bytes,
    pub done: oneshot::Sender<Result<u64, RelayError>>,
}

/// Acknowledgement sent once a close request has fully completed
pub type CloseAck = oneshot::Sender<()>;

/// Shared state for one open stream
pub struct StreamEntry {
    handle: StreamHandle,
    direction: StreamDirection,
    /// Request URL (never includes headers or body)
    url: String,
    progress: TransferProgress,
    state: Mutex<StreamState>,
    /// Present for uploads only
    inbox: Option<mpsc::Sender<PendingWrite>>,
    /// Taken once by the first close request
    close_tx: Mutex<Option<oneshot::Sender<CloseAck>>>,
    started_at: Instant,
}

impl StreamEntry {
    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn direction(&self) -> StreamDirection {
        self.direction
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Current progress snapshot
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Live counters, updated by the owning task
    pub fn tracker(&self) -> &TransferProgress {
        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Move to `next` if the transition is legal
    ///
    /// Returns false (and leaves the state alone) otherwise.
    pub fn transition(&self, next: StreamState) -> bool {
        let mut state = self.state.lock();
        let current = *state;
        if current.can_transition_to(next) {
            *state = next;
            true
        } else {
            debug!(stream = %self.handle, from = %current, to = %next, "ignored stream transition");
            false
        }
    }

    /// Queue a chunk for the owning task
    ///
    /// Waits while the inbox is full. The returned receiver resolves once
    /// the chunk has been drained into the sink or rejected.
    ///
    /// # Errors
    ///
    /// `InvalidArguments` for download streams; `UnknownStream` if the
    /// owning task has already finished.
    pub async fn submit(
        &self,
        data: Bytes,
    ) -> Result<oneshot::Receiver<Result<u64, RelayError>>, RelayError> {
        let Some(inbox) = &self.inbox else {
            return Err(RelayError::InvalidArguments(format!(
                "stream {} is a {} and does not accept writes",
                self.handle, self.direction
            )));
        };
        let (done, result) = oneshot::channel();
        inbox
            .send(PendingWrite { data, done })
            .await
            .map_err(|_| RelayError::UnknownStream(self.handle))?;
        Ok(result)
    }

    /// Ask the owning task to close the stream
    ///
    /// Returns a receiver that resolves once the stream has reached a
    /// terminal state and left the registry, or `None` if a close was
    /// already requested or the task is gone.
    pub fn request_close(&self) -> Option<oneshot::Receiver<()>> {
        let tx = self.close_tx.lock().take()?;
        let (ack_tx, ack_rx) = oneshot::channel();
        tx.send(ack_tx).ok()?;
        Some(ack_rx)
    }
}

impl std::fmt::Debug for StreamEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEntry")
            .field("handle", &self.handle)
            .field("direction", &self.direction)
            .field("url", &self.url)
            .field("state", &self.state())
            .field("progress", &self.progress())
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Registry of open streams
pub struct StreamRegistry {
    streams: DashMap<StreamHandle, Arc<StreamEntry>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
        }
    }

    /// Register a new stream in the `Created` state
    ///
    /// # Returns
    /// The shared entry and the receiver the owning task watches for close
    /// requests.
    pub fn register(
        &self,
        direction: StreamDirection,
        url: String,
        total_bytes: Option<u64>,
        inbox: Option<mpsc::Sender<PendingWrite>>,
    ) -> (Arc<StreamEntry>, oneshot::Receiver<CloseAck>) {
        let (close_tx, close_rx) = oneshot::channel();
        let entry = Arc::new(StreamEntry {
            handle: StreamHandle::new(),
            direction,
            url,
            progress: TransferProgress::new(total_bytes),
            state: Mutex::new(StreamState::Created),
            inbox,
            close_tx: Mutex::new(Some(close_tx)),
            started_at: Instant::now(),
        });
        self.streams.insert(entry.handle, Arc::clone(&entry));
        (entry, close_rx)
    }

    /// Find an open stream
    ///
    /// # Errors
    ///
    /// Returns `UnknownStream` if the handle is not registered.
    pub fn lookup(&self, handle: StreamHandle) -> Result<Arc<StreamEntry>, RelayError> {
        self.streams
            .get(&handle)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RelayError::UnknownStream(handle))
    }

    /// Remove a stream (called when it reaches a terminal state)
    pub fn unregister(&self, handle: StreamHandle) -> Option<Arc<StreamEntry>> {
        self.streams.remove(&handle).map(|(_, entry)| entry)
    }

    /// Get all open streams
    pub fn snapshot(&self) -> Vec<Arc<StreamEntry>> {
        self.streams
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.streams.len()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters a stream when dropped
///
/// Keeps the registry consistent when a transfer task exits early.
pub struct StreamRegistryGuard {
    registry: Arc<StreamRegistry>,
    handle: StreamHandle,
}

impl StreamRegistryGuard {
    pub fn new(registry: Arc<StreamRegistry>, handle: StreamHandle) -> Self {
        Self { registry, handle }
    }
}

impl Drop for StreamRegistryGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.handle);
    }
}
