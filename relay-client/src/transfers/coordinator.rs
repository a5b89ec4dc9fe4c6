//! Transfer coordinator
//!
//! Starts transfers and routes host commands to the task that owns each
//! stream. Callers never touch a sink directly.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use relay_common::StreamHandle;
use relay_common::protocol::DataTaskResponse;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::TransferContext;
use super::download::DownloadTask;
use super::request;
use super::upload::UploadTask;
use crate::constants::STREAM_INBOX_CAPACITY;
use crate::error::RelayError;
use crate::streams::{StreamDirection, StreamRegistry};
use crate::transport::RelayRequest;

/// Entry point for every transfer the relay performs
pub struct TransferCoordinator {
    ctx: TransferContext,
}

impl TransferCoordinator {
    pub(crate) fn new(ctx: TransferContext) -> Self {
        Self { ctx }
    }

    /// Streams that have not reached a terminal state
    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.ctx.registry
    }

    /// Send a complete request and wait for the complete response
    ///
    /// # Errors
    ///
    /// See `request::data_task`.
    pub async fn data_task(&self, request: RelayRequest) -> Result<DataTaskResponse, RelayError> {
        request::data_task(&self.ctx, request).await
    }

    /// Register an upload and spawn the task that drives it
    ///
    /// The chunk size in force now is used for the whole upload.
    pub fn start_upload(&self, request: RelayRequest, total_bytes: Option<u64>) -> StreamHandle {
        let chunk_size = self.ctx.settings.borrow().stream_chunk_size;
        let (inbox_tx, inbox) = mpsc::channel(STREAM_INBOX_CAPACITY);
        let (entry, close_rx) = self.ctx.registry.register(
            StreamDirection::Upload,
            request.url.to_string(),
            total_bytes,
            Some(inbox_tx),
        );
        let handle = entry.handle();
        info!(stream = %handle, url = %request.url, total_bytes, chunk_size, "upload started");

        let task = UploadTask {
            ctx: self.ctx.clone(),
            entry,
            request,
            chunk_size,
            inbox,
            close_rx,
        };
        tokio::spawn(task.run());
        handle
    }

    /// Register a download into `destination` and spawn the task that
    /// drives it
    pub fn start_download(&self, request: RelayRequest, destination: PathBuf) -> StreamHandle {
        let (entry, close_rx) = self.ctx.registry.register(
            StreamDirection::Download,
            request.url.to_string(),
            None,
            None,
        );
        let handle = entry.handle();
        info!(
            stream = %handle,
            url = %request.url,
            destination = %destination.display(),
            "download started"
        );

        let task = DownloadTask {
            ctx: self.ctx.clone(),
            entry,
            request,
            destination,
            close_rx,
        };
        tokio::spawn(task.run());
        handle
    }

    /// Submit one chunk to an upload and wait until it has been drained
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the handle is not open, `InvalidArguments` for a
    /// download handle, or the error that stopped the stream.
    pub async fn write(&self, handle: StreamHandle, data: Bytes) -> Result<u64, RelayError> {
        let entry = self.ctx.registry.lookup(handle)?;
        let done = entry.submit(data).await?;
        drop(entry);
        done.await.map_err(|_| RelayError::UnknownStream(handle))?
    }

    /// Close a stream and wait until its terminal event has been emitted
    ///
    /// Finishes an upload or cancels a download.
    ///
    /// # Errors
    ///
    /// `UnknownStream` if the handle is not open or is already closing.
    pub async fn close(&self, handle: StreamHandle) -> Result<(), RelayError> {
        let entry = self.ctx.registry.lookup(handle)?;
        let ack = entry
            .request_close()
            .ok_or(RelayError::UnknownStream(handle))?;
        drop(entry);
        ack.await.map_err(|_| RelayError::UnknownStream(handle))
    }

    /// Close every open stream
    pub async fn close_all(&self) {
        let open = self.ctx.registry.snapshot();
        debug!(count = open.len(), "closing open streams");
        for entry in open {
            if let Some(ack) = entry.request_close() {
                let _ = ack.await;
            }
        }
    }
}
