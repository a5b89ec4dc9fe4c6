//! Shared test doubles for relay integration tests
//!
//! `TestEngine` passes bytes through unchanged and can be told to reject
//! every pairing issued so far, or every pairing at all. `TestTransport`
//! echoes data tasks and follows a script for uploads and downloads.

#![allow(dead_code)]

use std::collections::HashSet;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relay_client::pairing::{Pairing, PairingEngine};
use relay_client::transport::{
    DownloadChannel, RawResponse, RelayRequest, RelayTransport, SealedRequest, UploadChannel,
};
use relay_client::{EngineError, Relay, Settings, TransportError};
use relay_common::protocol::{RelayEvent, StreamResponse};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

pub const RELAY_URL: &str = "https://relay.example";

// ============================================================================
// Pairing engine
// ============================================================================

#[derive(Default)]
pub struct TestEngine {
    next_id: AtomicU64,
    handshakes: AtomicUsize,
    issued: Mutex<Vec<String>>,
    invalid: Mutex<HashSet<String>>,
    reject_all: AtomicBool,
    forgotten: Mutex<Vec<String>>,
}

impl TestEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().clone()
    }

    /// Reject every pairing issued so far, as an expired server would
    pub fn invalidate_all(&self) {
        let issued = self.issued.lock().clone();
        self.invalid.lock().extend(issued);
    }

    /// Reject every pairing, including ones handshaken later
    pub fn reject_everything(&self) {
        self.reject_all.store(true, Ordering::SeqCst);
    }

    fn check(&self, pairing: &Pairing) -> Result<(), EngineError> {
        if self.reject_all.load(Ordering::SeqCst) || self.invalid.lock().contains(pairing.id()) {
            return Err(EngineError::PairingInvalid(pairing.id().to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PairingEngine for TestEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn handshake(&self, origin: &str) -> Result<Pairing, EngineError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        let id = format!("pair-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.issued.lock().push(id.clone());
        Ok(Pairing::new(id, origin))
    }

    fn forget(&self, pairing: &Pairing) {
        self.forgotten.lock().push(pairing.id().to_string());
    }

    fn set_persist_pairs(&self, _persist: bool) {}

    async fn seal_request(
        &self,
        pairing: &Pairing,
        request: &RelayRequest,
    ) -> Result<SealedRequest, EngineError> {
        self.check(pairing)?;
        Ok(SealedRequest {
            url: request.url.clone(),
            method: request.method,
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            body: request.body.clone(),
        })
    }

    async fn open_response(
        &self,
        pairing: &Pairing,
        response: RawResponse,
    ) -> Result<RawResponse, EngineError> {
        self.check(pairing)?;
        Ok(response)
    }

    async fn seal_chunk(&self, pairing: &Pairing, chunk: Bytes) -> Result<Bytes, EngineError> {
        self.check(pairing)?;
        Ok(chunk)
    }

    async fn open_chunk(&self, pairing: &Pairing, chunk: Bytes) -> Result<Bytes, EngineError> {
        self.check(pairing)?;
        Ok(chunk)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Scripted download response
#[derive(Clone)]
pub struct DownloadScript {
    pub status: u16,
    pub chunks: Vec<Bytes>,
    /// Declared `Content-Length`; defaults to the sum of the chunks
    pub content_length: Option<u64>,
    /// Keep the body open after the last chunk
    pub hold_open: bool,
    /// Fail the body with this network error after the last chunk
    pub error: Option<String>,
}

impl Default for DownloadScript {
    fn default() -> Self {
        Self {
            status: 200,
            chunks: Vec::new(),
            content_length: None,
            hold_open: false,
            error: None,
        }
    }
}

/// How the test relay treats an upload body
#[derive(Clone, Copy, Debug, Default)]
pub enum UploadScript {
    /// Read to the end, then answer 201 with the body received
    #[default]
    Echo,
    /// Read at least `after` bytes, answer 413 and hang up
    Reject { after: usize },
    /// Accept `after` bytes, then fail every write without answering
    FailSink { after: usize },
}

/// Upload sink that accepts a fixed number of bytes and then errors
struct FailingSink {
    remaining: usize,
}

impl AsyncWrite for FailingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.remaining == 0 {
            return Poll::Ready(Err(io::Error::other("disk quota exceeded")));
        }
        let n = buf.len().min(self.remaining);
        self.remaining -= n;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

type ResponseSender = oneshot::Sender<Result<RawResponse, TransportError>>;

pub struct TestTransport {
    /// Buffer between an upload sink and the reader draining it
    upload_buffer: usize,
    upload: UploadScript,
    download: Mutex<DownloadScript>,
    held: Mutex<Vec<mpsc::Sender<Result<Bytes, TransportError>>>>,
    held_responses: Mutex<Vec<ResponseSender>>,
}

impl TestTransport {
    pub fn new() -> Arc<Self> {
        Self::scripted(UploadScript::Echo, DownloadScript::default())
    }

    pub fn with_download(script: DownloadScript) -> Arc<Self> {
        Self::scripted(UploadScript::Echo, script)
    }

    pub fn with_upload(script: UploadScript) -> Arc<Self> {
        Self::scripted(script, DownloadScript::default())
    }

    fn scripted(upload: UploadScript, download: DownloadScript) -> Arc<Self> {
        Arc::new(Self {
            upload_buffer: 16,
            upload,
            download: Mutex::new(download),
            held: Mutex::new(Vec::new()),
            held_responses: Mutex::new(Vec::new()),
        })
    }

    fn echo_upload(&self) -> UploadChannel {
        // A small pipe so the writer has to wait for the reader
        let (writer, mut reader) = tokio::io::duplex(self.upload_buffer);
        let (tx, response) = oneshot::channel();
        tokio::spawn(async move {
            let mut received = Vec::new();
            let result = match reader.read_to_end(&mut received).await {
                Ok(_) => Ok(RawResponse {
                    status: Some(201),
                    headers: vec![("x-received".to_string(), Value::from(received.len()))],
                    body: Bytes::from(received),
                }),
                Err(e) => Err(TransportError::Network(e.to_string())),
            };
            let _ = tx.send(result);
        });
        UploadChannel {
            body: Box::new(writer),
            response,
        }
    }

    fn rejecting_upload(&self, after: usize) -> UploadChannel {
        let (writer, mut reader) = tokio::io::duplex(self.upload_buffer);
        let (tx, response) = oneshot::channel();
        tokio::spawn(async move {
            let mut received = 0;
            let mut buf = [0u8; 64];
            while received < after {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received += n,
                }
            }
            // Answer first, then hang up on the rest of the body
            let _ = tx.send(Ok(RawResponse {
                status: Some(413),
                headers: vec![("content-type".to_string(), Value::from("text/plain"))],
                body: Bytes::from_static(b"too large"),
            }));
            drop(reader);
        });
        UploadChannel {
            body: Box::new(writer),
            response,
        }
    }

    fn failing_upload(&self, after: usize) -> UploadChannel {
        let (tx, response) = oneshot::channel();
        self.held_responses.lock().push(tx);
        UploadChannel {
            body: Box::new(FailingSink { remaining: after }),
            response,
        }
    }
}

#[async_trait]
impl RelayTransport for TestTransport {
    async fn send(&self, request: SealedRequest) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: Some(200),
            headers: request
                .headers
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect(),
            body: request.body.unwrap_or_default(),
        })
    }

    async fn open_upload(&self, _request: SealedRequest) -> Result<UploadChannel, TransportError> {
        Ok(match self.upload {
            UploadScript::Echo => self.echo_upload(),
            UploadScript::Reject { after } => self.rejecting_upload(after),
            UploadScript::FailSink { after } => self.failing_upload(after),
        })
    }

    async fn open_download(
        &self,
        _request: SealedRequest,
    ) -> Result<DownloadChannel, TransportError> {
        let script = self.download.lock().clone();
        let total: u64 = script.chunks.iter().map(|c| c.len() as u64).sum();
        let length = script.content_length.unwrap_or(total);

        let (tx, body) = mpsc::channel(script.chunks.len() + 1);
        for chunk in script.chunks {
            let _ = tx.try_send(Ok(chunk));
        }
        if let Some(message) = script.error {
            let _ = tx.try_send(Err(TransportError::Network(message)));
        }
        if script.hold_open {
            self.held.lock().push(tx);
        }

        Ok(DownloadChannel {
            head: RawResponse {
                status: Some(script.status),
                headers: vec![
                    ("Content-Length".to_string(), Value::from(length)),
                    ("content-type".to_string(), Value::from("application/octet-stream")),
                ],
                body: Bytes::new(),
            },
            body,
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Initialized relay with default settings
pub async fn relay(
    engine: &Arc<TestEngine>,
    transport: &Arc<TestTransport>,
) -> (Arc<Relay>, mpsc::UnboundedReceiver<RelayEvent>) {
    relay_with(engine, transport, Settings::default()).await
}

pub async fn relay_with(
    engine: &Arc<TestEngine>,
    transport: &Arc<TestTransport>,
    settings: Settings,
) -> (Arc<Relay>, mpsc::UnboundedReceiver<RelayEvent>) {
    let (relay, mut events) = Relay::new(
        Arc::clone(engine) as Arc<dyn PairingEngine>,
        Arc::clone(transport) as Arc<dyn RelayTransport>,
        settings,
    )
    .unwrap();
    relay.initialize_relay().await.unwrap();
    // Drop the initialization message
    assert!(matches!(
        events.recv().await,
        Some(RelayEvent::RelayResponseMessage { .. })
    ));
    (Arc::new(relay), events)
}

/// Events for one stream, up to and including its terminal response
#[derive(Debug, Default)]
pub struct StreamEvents {
    pub opened: bool,
    pub fractions: Vec<f64>,
    pub response: Option<StreamResponse>,
}

/// Drain events until every handle in `handles` has reported a terminal
/// response, grouping them per handle
pub async fn collect(
    events: &mut mpsc::UnboundedReceiver<RelayEvent>,
    handles: &[relay_common::StreamHandle],
) -> Vec<StreamEvents> {
    let mut grouped: Vec<StreamEvents> = handles.iter().map(|_| StreamEvents::default()).collect();
    while grouped.iter().any(|g| g.response.is_none()) {
        let event = events.recv().await.unwrap();
        let Some(index) = event
            .stream_id()
            .and_then(|id| handles.iter().position(|h| *h == id))
        else {
            continue;
        };
        let group = &mut grouped[index];
        match event {
            RelayEvent::GetFileStream { .. } => group.opened = true,
            RelayEvent::StreamCompletionPercentage { fraction, .. } => {
                group.fractions.push(fraction)
            }
            RelayEvent::RelayStreamResponse(response) => group.response = Some(response),
            RelayEvent::RelayResponseMessage { .. } => {}
        }
    }
    grouped
}

/// Deterministic test payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
