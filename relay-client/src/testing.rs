//! In-memory pairing engine and transport for unit tests

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, oneshot};

use crate::error::{EngineError, TransportError};
use crate::pairing::{Pairing, PairingEngine};
use crate::transport::{
    DownloadChannel, RawResponse, RelayRequest, RelayTransport, SealedRequest, UploadChannel,
};

/// Engine that passes bytes through unchanged and records pairing churn
#[derive(Default)]
pub(crate) struct MockEngine {
    next_id: AtomicU64,
    handshakes: AtomicUsize,
    transient_failures: AtomicUsize,
    refuse: AtomicBool,
    issued: Mutex<Vec<String>>,
    invalid: Mutex<HashSet<String>>,
    forgotten: Mutex<Vec<String>>,
    persist: Mutex<Option<bool>>,
}

impl MockEngine {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of handshake attempts, including failed ones
    pub(crate) fn handshakes(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }

    pub(crate) fn forgotten(&self) -> Vec<String> {
        self.forgotten.lock().clone()
    }

    pub(crate) fn persist_pairs(&self) -> Option<bool> {
        *self.persist.lock()
    }

    /// Make the next `n` handshakes fail with a transient error
    pub(crate) fn fail_next_handshakes(&self, n: usize) {
        self.transient_failures.store(n, Ordering::SeqCst);
    }

    /// Make handshakes fail permanently
    pub(crate) fn refuse_handshakes(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Mark every pairing issued so far as rejected by the server
    pub(crate) fn invalidate_all(&self) {
        let issued = self.issued.lock().clone();
        self.invalid.lock().extend(issued);
    }

    fn check(&self, pairing: &Pairing) -> Result<(), EngineError> {
        if self.invalid.lock().contains(pairing.id()) {
            return Err(EngineError::PairingInvalid(format!(
                "{} expired",
                pairing.id()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PairingEngine for MockEngine {
    async fn initialize(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn handshake(&self, origin: &str) -> Result<Pairing, EngineError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(EngineError::Failed("handshake refused".into()));
        }
        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(EngineError::Transient("connection reset".into()));
        }
        let id = format!("pair-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.issued.lock().push(id.clone());
        Ok(Pairing::new(id, origin))
    }

    fn forget(&self, pairing: &Pairing) {
        self.forgotten.lock().push(pairing.id().to_string());
    }

    fn set_persist_pairs(&self, persist: bool) {
        *self.persist.lock() = Some(persist);
    }

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

/// Transport that answers every request with a 200 echoing it back
///
/// Data tasks echo headers and body. Uploads answer with the bytes the
/// sink received. Downloads serve `download_body` in the given chunks.
#[derive(Default)]
pub(crate) struct MockTransport {
    download_body: Mutex<Vec<Bytes>>,
}

impl MockTransport {
    pub(crate) fn with_download(chunks: Vec<Bytes>) -> Self {
        Self {
            download_body: Mutex::new(chunks),
        }
    }
}

fn echo_headers(headers: &[(String, String)]) -> Vec<(String, Value)> {
    headers
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

#[async_trait]
impl RelayTransport for MockTransport {
    async fn send(&self, request: SealedRequest) -> Result<RawResponse, TransportError> {
        Ok(RawResponse {
            status: Some(200),
            headers: echo_headers(&request.headers),
            body: request.body.unwrap_or_default(),
        })
    }

    async fn open_upload(&self, _request: SealedRequest) -> Result<UploadChannel, TransportError> {
        let (writer, mut reader) = tokio::io::duplex(64);
        let (tx, response) = oneshot::channel();
        tokio::spawn(async move {
            let mut received = Vec::new();
            let result = match reader.read_to_end(&mut received).await {
                Ok(_) => Ok(RawResponse {
                    status: Some(200),
                    headers: Vec::new(),
                    body: Bytes::from(received),
                }),
                Err(e) => Err(TransportError::Network(e.to_string())),
            };
            let _ = tx.send(result);
        });
        Ok(UploadChannel {
            body: Box::new(writer),
            response,
        })
    }

    async fn open_download(
        &self,
        _request: SealedRequest,
    ) -> Result<DownloadChannel, TransportError> {
        let chunks = self.download_body.lock().clone();
        let total: usize = chunks.iter().map(Bytes::len).sum();
        let (tx, body) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.try_send(Ok(chunk));
        }
        Ok(DownloadChannel {
            head: RawResponse {
                status: Some(200),
                headers: vec![("Content-Length".to_string(), Value::from(total as u64))],
                body: Bytes::new(),
            },
            body,
        })
    }
}
