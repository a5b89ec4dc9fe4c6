//! Streamed upload driver
//!
//! The task owns the body sink. Host chunks arrive through the stream's
//! inbox in submission order; each is split into pieces of the chunk size
//! in force when the upload started, sealed, and drained into the sink
//! before the next chunk is taken. Closing finalizes the sink and waits
//! for the relay's response.

use std::sync::Arc;

use bytes::Bytes;
use relay_common::protocol::RelayEvent;
use tokio::sync::oneshot::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

use super::request::open_upload;
use super::{
    TransferContext, cancelled_response, closed_response, errored_response, status_message,
};
use crate::error::{RelayError, TransportError};
use crate::pairing::PairingLease;
use crate::streams::{
    CloseAck, PendingWrite, Sink, StreamEntry, StreamRegistryGuard, StreamState, drain, finish,
};
use crate::transport::{HttpResponse, RawResponse, RelayRequest, UploadChannel};

const UPLOAD_CANCELLED_MESSAGE: &str = "Upload closed before the relay accepted it";

pub(crate) struct UploadTask {
    pub(crate) ctx: TransferContext,
    pub(crate) entry: Arc<StreamEntry>,
    pub(crate) request: RelayRequest,
    pub(crate) chunk_size: usize,
    pub(crate) inbox: mpsc::Receiver<PendingWrite>,
    pub(crate) close_rx: oneshot::Receiver<CloseAck>,
}

/// Why the chunk loop stopped
enum Stop {
    Closed(Option<CloseAck>),
    /// The relay responded before the host closed the stream
    Answered(Result<HttpResponse, RelayError>),
    Failed(RelayError),
}

impl UploadTask {
    #[instrument(skip_all, fields(stream = %self.entry.handle()))]
    pub(crate) async fn run(self) {
        let UploadTask {
            ctx,
            entry,
            request,
            chunk_size,
            mut inbox,
            mut close_rx,
        } = self;
        let handle = entry.handle();
        let _guard = StreamRegistryGuard::new(Arc::clone(&ctx.registry), handle);

        let opened = tokio::select! {
            biased;
            signal = &mut close_rx => Err(signal.ok()),
            result = open_upload(&ctx, &request) => Ok(result),
        };

        let mut ack = None;
        let response = match opened {
            Err(early_ack) => {
                ack = early_ack;
                cancelled_response(handle, UPLOAD_CANCELLED_MESSAGE)
            }
            Ok(Err(err)) => errored_response(handle, &err),
            Ok(Ok((mut lease, mut channel))) => {
                entry.transition(StreamState::Open);
                ctx.emit(RelayEvent::GetFileStream { stream_id: handle });

                let stop = pump(
                    &ctx,
                    &entry,
                    &mut lease,
                    &mut channel,
                    chunk_size,
                    &mut inbox,
                    &mut close_rx,
                )
                .await;
                match stop {
                    Stop::Closed(close_ack) => {
                        ack = close_ack;
                        match complete(&ctx, &lease, channel).await {
                            Ok(http) => closed_response(handle, http),
                            Err(err) => errored_response(handle, &err),
                        }
                    }
                    Stop::Answered(Ok(http)) => closed_response(handle, http),
                    Stop::Answered(Err(err)) | Stop::Failed(err) => errored_response(handle, &err),
                }
            }
        };

        // Chunks still queued are discarded with the stream
        inbox.close();
        while let Ok(pending) = inbox.try_recv() {
            let _ = pending.done.send(Err(RelayError::UnknownStream(handle)));
        }

        ctx.finish(&entry, response);

        // A close that arrived after the loop stopped still gets its answer
        if ack.is_none() {
            ack = close_rx.try_recv().ok();
        }
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }
}

/// Drain host chunks until the stream is closed, the relay answers, or
/// a chunk fails
///
/// Close requests are only observed between chunks, so a chunk already
/// taken from the inbox is always fully flushed first.
async fn pump(
    ctx: &TransferContext,
    entry: &StreamEntry,
    lease: &mut PairingLease,
    channel: &mut UploadChannel,
    chunk_size: usize,
    inbox: &mut mpsc::Receiver<PendingWrite>,
    close_rx: &mut oneshot::Receiver<CloseAck>,
) -> Stop {
    loop {
        tokio::select! {
            biased;
            signal = &mut *close_rx => return Stop::Closed(signal.ok()),
            answer = &mut channel.response => {
                debug!("relay answered before the upload was closed");
                return Stop::Answered(open_answer(ctx, lease, answer).await);
            }
            next = inbox.recv() => {
                let Some(PendingWrite { data, done }) = next else {
                    return Stop::Closed(None);
                };
                let written =
                    write_chunk(ctx, entry, lease, &mut channel.body, chunk_size, data).await;
                match written {
                    Ok(written) => {
                        let _ = done.send(Ok(written));
                    }
                    Err(err) => {
                        // A relay that answered and hung up explains the failed write
                        if let Ok(answer) = channel.response.try_recv() {
                            let answered = open_answer(ctx, lease, Ok(answer)).await;
                            let _ = done.send(Err(answered_write_error(&answered)));
                            return Stop::Answered(answered);
                        }
                        let _ = done.send(Err(err.clone()));
                        return Stop::Failed(err);
                    }
                }
            }
        }
    }
}

/// Seal and drain one host chunk, then report progress
async fn write_chunk(
    ctx: &TransferContext,
    entry: &StreamEntry,
    lease: &mut PairingLease,
    sink: &mut Sink,
    chunk_size: usize,
    data: Bytes,
) -> Result<u64, RelayError> {
    entry.transition(StreamState::Draining);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        let sealed = ctx.seal_chunk(lease, data.slice(offset..end)).await?;
        drain(sink, &sealed).await?;
        entry.tracker().add((end - offset) as u64);
        offset = end;
    }
    entry.transition(StreamState::Open);
    debug!(bytes = data.len(), total = entry.progress().bytes_completed, "chunk drained");
    ctx.emit_progress(entry);
    Ok(data.len() as u64)
}

/// Finalize the body and open the relay's response
async fn complete(
    ctx: &TransferContext,
    lease: &PairingLease,
    channel: UploadChannel,
) -> Result<HttpResponse, RelayError> {
    let UploadChannel {
        body: mut sink,
        mut response,
    } = channel;
    let finished = finish(&mut sink).await;
    drop(sink);

    let answer = match finished {
        Ok(()) => response.await,
        Err(err) => match response.try_recv() {
            Ok(answer) => Ok(answer),
            Err(_) => return Err(err.into()),
        },
    };
    open_answer(ctx, lease, answer).await
}

/// Open the relay's response to an upload
async fn open_answer(
    ctx: &TransferContext,
    lease: &PairingLease,
    answer: Result<Result<RawResponse, TransportError>, RecvError>,
) -> Result<HttpResponse, RelayError> {
    let raw = answer
        .map_err(|_| RelayError::Relay("transport dropped the upload response".to_string()))??;
    let opened = ctx.engine.open_response(lease.pairing(), raw).await?;
    opened.into_http()
}

/// Error for the chunk that was in flight when the relay answered
fn answered_write_error(answered: &Result<HttpResponse, RelayError>) -> RelayError {
    match answered {
        Ok(http) if !http.is_success() => RelayError::Relay(status_message(http.status)),
        Ok(http) => RelayError::Relay(format!(
            "Relay server ended the upload early with status {}",
            http.status
        )),
        Err(err) => err.clone(),
    }
}
