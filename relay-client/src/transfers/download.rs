//! Streamed download driver
//!
//! Body chunks are opened and written to `<destination>.part` as they
//! arrive. The partial file is renamed over the destination once the body
//! ends, and removed if the download fails or is cancelled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use tokio::fs::File;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument, warn};

use super::request::open_download;
use super::{TransferContext, cancelled_response, closed_response, errored_response, part_path};
use crate::constants::DOWNLOAD_CANCELLED_MESSAGE;
use crate::error::{RelayError, TransportError};
use crate::pairing::PairingLease;
use crate::streams::{
    CloseAck, StreamEntry, StreamRegistryGuard, StreamState, StreamWriteError, drain, finish,
};
use crate::transport::RelayRequest;

pub(crate) struct DownloadTask {
    pub(crate) ctx: TransferContext,
    pub(crate) entry: Arc<StreamEntry>,
    pub(crate) request: RelayRequest,
    pub(crate) destination: PathBuf,
    pub(crate) close_rx: oneshot::Receiver<CloseAck>,
}

enum Stop {
    Finished,
    Cancelled(Option<CloseAck>),
    Failed(RelayError),
}

impl DownloadTask {
    #[instrument(skip_all, fields(stream = %self.entry.handle()))]
    pub(crate) async fn run(self) {
        let DownloadTask {
            ctx,
            entry,
            request,
            destination,
            mut close_rx,
        } = self;
        let handle = entry.handle();
        let _guard = StreamRegistryGuard::new(Arc::clone(&ctx.registry), handle);

        let opened = tokio::select! {
            biased;
            signal = &mut close_rx => Err(signal.ok()),
            result = open_download(&ctx, &request) => Ok(result),
        };

        let mut ack = None;
        let response = match opened {
            Err(early_ack) => {
                ack = early_ack;
                cancelled_response(handle, DOWNLOAD_CANCELLED_MESSAGE)
            }
            Ok(Err(err)) => errored_response(handle, &err),
            Ok(Ok((_, head, _))) if !head.is_success() => {
                debug!(status = head.status, "download refused, nothing written");
                closed_response(handle, head)
            }
            Ok(Ok((mut lease, head, channel))) => {
                if let Some(total) = head.content_length() {
                    entry.tracker().set_total(total);
                }
                entry.transition(StreamState::Open);

                let part = part_path(&destination);
                let stop = receive(
                    &ctx,
                    &entry,
                    &mut lease,
                    &part,
                    channel.body,
                    &mut close_rx,
                )
                .await;
                match stop {
                    Stop::Finished => match tokio::fs::rename(&part, &destination).await {
                        Ok(()) => closed_response(handle, head),
                        Err(e) => {
                            discard(&part).await;
                            let written = entry.progress().bytes_completed as usize;
                            let err = StreamWriteError::new(written, e.to_string());
                            errored_response(handle, &err.into())
                        }
                    },
                    Stop::Cancelled(close_ack) => {
                        ack = close_ack;
                        discard(&part).await;
                        cancelled_response(handle, DOWNLOAD_CANCELLED_MESSAGE)
                    }
                    Stop::Failed(err) => {
                        discard(&part).await;
                        errored_response(handle, &err)
                    }
                }
            }
        };

        ctx.finish(&entry, response);

        if ack.is_none() {
            ack = close_rx.try_recv().ok();
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

/// Write the body into the partial file until it ends, fails, or the
/// host closes the stream
async fn receive(
    ctx: &TransferContext,
    entry: &StreamEntry,
    lease: &mut PairingLease,
    part: &Path,
    mut body: mpsc::Receiver<Result<Bytes, TransportError>>,
    close_rx: &mut oneshot::Receiver<CloseAck>,
) -> Stop {
    let mut file = match create_part(part).await {
        Ok(file) => file,
        Err(err) => return Stop::Failed(err),
    };

    loop {
        tokio::select! {
            biased;
            signal = &mut *close_rx => return Stop::Cancelled(signal.ok()),
            next = body.recv() => match next {
                None => {
                    return match finish(&mut file).await {
                        Ok(()) => Stop::Finished,
                        Err(e) => Stop::Failed(e.into()),
                    };
                }
                Some(Err(e)) => {
                    warn!(error = %e, "download body interrupted");
                    return Stop::Failed(e.into());
                }
                Some(Ok(chunk)) => {
                    if let Err(err) = write_chunk(ctx, entry, lease, &mut file, chunk).await {
                        return Stop::Failed(err);
                    }
                }
            },
        }
    }
}

async fn write_chunk(
    ctx: &TransferContext,
    entry: &StreamEntry,
    lease: &mut PairingLease,
    file: &mut File,
    chunk: Bytes,
) -> Result<(), RelayError> {
    entry.transition(StreamState::Draining);
    let opened = ctx.open_chunk(lease, chunk).await?;
    drain(file, &opened).await?;
    entry.tracker().add(opened.len() as u64);
    entry.transition(StreamState::Open);
    ctx.emit_progress(entry);
    Ok(())
}

async fn create_part(part: &Path) -> Result<File, RelayError> {
    if let Some(parent) = part.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StreamWriteError::new(0, e.to_string()))?;
    }
    let file = File::create(part)
        .await
        .map_err(|e| StreamWriteError::new(0, e.to_string()))?;
    Ok(file)
}

async fn discard(part: &Path) {
    if let Err(e) = tokio::fs::remove_file(part).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(error = %e, "failed to remove partial download");
    }
}
