//! Transfer coordination
//!
//! One spawned task drives each streamed transfer from open to a terminal
//! state and emits its events. Every transfer ends with exactly one
//! `relayStreamResponse`.

mod coordinator;
mod download;
mod progress;
mod request;
mod upload;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use relay_common::protocol::{RelayEvent, StreamOutcome, StreamResponse};
use relay_common::StreamHandle;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

pub use coordinator::TransferCoordinator;
pub use progress::{ProgressSnapshot, TransferProgress};

use crate::constants::PART_SUFFIX;
use crate::error::RelayError;
use crate::pairing::{PairingEngine, PairingLease, PairingPool};
use crate::settings::Settings;
use crate::streams::{StreamEntry, StreamRegistry, StreamState};
use crate::transport::{HttpResponse, RelayTransport};

/// Channel the relay emits host events on
pub type EventSender = mpsc::UnboundedSender<RelayEvent>;

/// Everything a transfer task needs, cheap to clone into each task
#[derive(Clone)]
pub(crate) struct TransferContext {
    pub(crate) pool: Arc<PairingPool>,
    pub(crate) engine: Arc<dyn PairingEngine>,
    pub(crate) transport: Arc<dyn RelayTransport>,
    pub(crate) registry: Arc<StreamRegistry>,
    pub(crate) settings: watch::Receiver<Settings>,
    pub(crate) events: EventSender,
}

impl TransferContext {
    pub(crate) fn emit(&self, event: RelayEvent) {
        // Host went away; nothing left to notify
        let _ = self.events.send(event);
    }

    /// Emit the stream's completion fraction, if its size is known
    pub(crate) fn emit_progress(&self, entry: &StreamEntry) {
        if let Some(fraction) = entry.progress().fraction() {
            self.emit(RelayEvent::StreamCompletionPercentage {
                stream_id: entry.handle(),
                fraction,
            });
        }
    }

    /// Move a stream to its terminal state, drop it from the registry, and
    /// emit its final report
    pub(crate) fn finish(&self, entry: &StreamEntry, response: StreamResponse) {
        let state = match response.state {
            StreamOutcome::Closed => StreamState::Closed,
            StreamOutcome::Errored => StreamState::Errored,
        };
        entry.transition(state);
        self.registry.unregister(entry.handle());

        let progress = entry.progress();
        if response.success {
            info!(
                stream = %entry.handle(),
                direction = %entry.direction(),
                bytes = progress.bytes_completed,
                elapsed_ms = entry.elapsed().as_millis() as u64,
                "transfer complete"
            );
        } else {
            warn!(
                stream = %entry.handle(),
                direction = %entry.direction(),
                state = %state,
                bytes = progress.bytes_completed,
                relay_error = response.relay_error.as_deref(),
                plugin_error = response.plugin_error.as_deref(),
                "transfer ended without success"
            );
        }
        self.emit(RelayEvent::RelayStreamResponse(response));
    }

    /// Seal one body chunk, re-pairing once if the pairing was rejected
    pub(crate) async fn seal_chunk(
        &self,
        lease: &mut PairingLease,
        chunk: Bytes,
    ) -> Result<Bytes, RelayError> {
        let mut renewed = false;
        loop {
            let attempt = self.engine.seal_chunk(lease.pairing(), chunk.clone()).await;
            match attempt {
                Err(e) if e.is_pairing_invalid() && !renewed => {
                    warn!(origin = lease.origin(), error = %e, "pairing rejected while sealing chunk");
                    renewed = true;
                    self.pool.renew(lease).await?;
                }
                other => return other.map_err(RelayError::from),
            }
        }
    }

    /// Open one body chunk, re-pairing once if the pairing was rejected
    pub(crate) async fn open_chunk(
        &self,
        lease: &mut PairingLease,
        chunk: Bytes,
    ) -> Result<Bytes, RelayError> {
        let mut renewed = false;
        loop {
            let attempt = self.engine.open_chunk(lease.pairing(), chunk.clone()).await;
            match attempt {
                Err(e) if e.is_pairing_invalid() && !renewed => {
                    warn!(origin = lease.origin(), error = %e, "pairing rejected while opening chunk");
                    renewed = true;
                    self.pool.renew(lease).await?;
                }
                other => return other.map_err(RelayError::from),
            }
        }
    }
}

/// Message for a response outside the 2xx range
pub(crate) fn status_message(status: u16) -> String {
    format!("Relay server responded with status {status}")
}

/// Terminal report for a stream that closed with an HTTP response
fn closed_response(handle: StreamHandle, response: HttpResponse) -> StreamResponse {
    let success = response.is_success();
    StreamResponse {
        stream_id: handle,
        success,
        state: StreamOutcome::Closed,
        relay_error: (!success).then(|| status_message(response.status)),
        data: (!response.body.is_empty()).then(|| response.body.to_vec()),
        headers: Some(response.headers),
        plugin_error: None,
    }
}

/// Terminal report for a stream closed by the host before completing
fn cancelled_response(handle: StreamHandle, message: &str) -> StreamResponse {
    StreamResponse {
        stream_id: handle,
        success: false,
        state: StreamOutcome::Closed,
        headers: None,
        data: None,
        relay_error: None,
        plugin_error: Some(message.to_string()),
    }
}

/// Terminal report for a failed stream
fn errored_response(handle: StreamHandle, err: &RelayError) -> StreamResponse {
    let message = err.to_string();
    let (relay_error, plugin_error) = if err.is_upstream() {
        (Some(message), None)
    } else {
        (None, Some(message))
    };
    StreamResponse {
        stream_id: handle,
        success: false,
        state: StreamOutcome::Errored,
        headers: None,
        data: None,
        relay_error,
        plugin_error,
    }
}

/// Path a download is written to until it completes
pub fn part_path(destination: &Path) -> PathBuf {
    let mut path = destination.as_os_str().to_owned();
    path.push(PART_SUFFIX);
    PathBuf::from(path)
}
