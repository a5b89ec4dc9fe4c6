//! Request exchanges that need a pairing
//!
//! Each exchange runs under one lease. If the engine rejects the pairing
//! before any body bytes have left, the pool re-pairs and the exchange is
//! replayed once from the start.

use std::collections::BTreeMap;

use relay_common::protocol::DataTaskResponse;
use tracing::{debug, instrument, warn};

use super::{TransferContext, status_message};
use crate::error::{EngineError, RelayError, TransportError};
use crate::pairing::PairingLease;
use crate::transport::{DownloadChannel, HttpResponse, RawResponse, RelayRequest, UploadChannel};

/// Why one exchange attempt failed
enum ExchangeError {
    Engine(EngineError),
    Transport(TransportError),
}

impl ExchangeError {
    fn is_pairing_invalid(&self) -> bool {
        matches!(self, ExchangeError::Engine(e) if e.is_pairing_invalid())
    }
}

impl From<ExchangeError> for RelayError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::Engine(e) => e.into(),
            ExchangeError::Transport(e) => e.into(),
        }
    }
}

async fn send_once(
    ctx: &TransferContext,
    lease: &PairingLease,
    request: &RelayRequest,
) -> Result<RawResponse, ExchangeError> {
    let sealed = ctx
        .engine
        .seal_request(lease.pairing(), request)
        .await
        .map_err(ExchangeError::Engine)?;
    let raw = ctx
        .transport
        .send(sealed)
        .await
        .map_err(ExchangeError::Transport)?;
    ctx.engine
        .open_response(lease.pairing(), raw)
        .await
        .map_err(ExchangeError::Engine)
}

/// Send a complete request through the relay
///
/// Transport failures are reported in the response rather than as an
/// error, carrying the transport's own description.
///
/// # Errors
///
/// `Relay` for engine failures or a response without an HTTP status;
/// `RePairFailed` if the pairing was rejected and re-pairing failed.
#[instrument(skip_all, fields(method = %request.method, url = %request.url))]
pub(crate) async fn data_task(
    ctx: &TransferContext,
    request: RelayRequest,
) -> Result<DataTaskResponse, RelayError> {
    let mut lease = ctx.pool.acquire(&request.origin()).await?;
    let mut renewed = false;
    let raw = loop {
        let attempt = send_once(ctx, &lease, &request).await;
        match attempt {
            Ok(raw) => break raw,
            Err(e) if e.is_pairing_invalid() && !renewed => {
                warn!(origin = lease.origin(), "pairing rejected, re-pairing and replaying request");
                renewed = true;
                ctx.pool.renew(&mut lease).await?;
            }
            Err(ExchangeError::Transport(e)) => {
                warn!(error = %e, "transport failed");
                return Ok(DataTaskResponse {
                    success: false,
                    data: None,
                    headers: BTreeMap::new(),
                    error: Some(e.to_string()),
                });
            }
            Err(e) => return Err(e.into()),
        }
    };

    let response = raw.into_http()?;
    debug!(status = response.status, bytes = response.body.len(), "data task complete");
    Ok(data_task_response(response))
}

fn data_task_response(response: HttpResponse) -> DataTaskResponse {
    let success = response.is_success();
    DataTaskResponse {
        success,
        error: (!success).then(|| status_message(response.status)),
        data: Some(response.body.to_vec()),
        headers: response.headers,
    }
}

/// Start a streamed upload: seal the request head and open the body sink
///
/// # Errors
///
/// `Relay` if sealing or the transport fails, `RePairFailed` if a
/// rejected pairing could not be replaced.
pub(crate) async fn open_upload(
    ctx: &TransferContext,
    request: &RelayRequest,
) -> Result<(PairingLease, UploadChannel), RelayError> {
    let mut lease = ctx.pool.acquire(&request.origin()).await?;
    let mut renewed = false;
    loop {
        let attempt = ctx.engine.seal_request(lease.pairing(), request).await;
        match attempt {
            Err(e) if e.is_pairing_invalid() && !renewed => {
                warn!(origin = lease.origin(), error = %e, "pairing rejected, re-pairing before upload");
                renewed = true;
                ctx.pool.renew(&mut lease).await?;
            }
            Err(e) => return Err(e.into()),
            Ok(sealed) => {
                let channel = ctx.transport.open_upload(sealed).await?;
                return Ok((lease, channel));
            }
        }
    }
}

async fn download_once(
    ctx: &TransferContext,
    lease: &PairingLease,
    request: &RelayRequest,
) -> Result<(RawResponse, DownloadChannel), ExchangeError> {
    let sealed = ctx
        .engine
        .seal_request(lease.pairing(), request)
        .await
        .map_err(ExchangeError::Engine)?;
    let mut channel = ctx
        .transport
        .open_download(sealed)
        .await
        .map_err(ExchangeError::Transport)?;
    let head = std::mem::take(&mut channel.head);
    let opened = ctx
        .engine
        .open_response(lease.pairing(), head)
        .await
        .map_err(ExchangeError::Engine)?;
    Ok((opened, channel))
}

/// Start a streamed download: send the request and open the response head
///
/// # Errors
///
/// `Relay` if sealing, the transport, or opening the head fails, or if
/// the head has no HTTP status; `RePairFailed` if a rejected pairing
/// could not be replaced.
pub(crate) async fn open_download(
    ctx: &TransferContext,
    request: &RelayRequest,
) -> Result<(PairingLease, HttpResponse, DownloadChannel), RelayError> {
    let mut lease = ctx.pool.acquire(&request.origin()).await?;
    let mut renewed = false;
    loop {
        let attempt = download_once(ctx, &lease, request).await;
        match attempt {
            Ok((head, channel)) => {
                let head = head.into_http()?;
                return Ok((lease, head, channel));
            }
            Err(e) if e.is_pairing_invalid() && !renewed => {
                warn!(origin = lease.origin(), "pairing rejected, re-pairing before download");
                renewed = true;
                ctx.pool.renew(&mut lease).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
