//! Pairing engine seam
//!
//! The engine owns key exchange and the encode/decode of headers and
//! bodies. This crate only decides when to pair, which pairing to use,
//! and when to throw one away.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::EngineError;
use crate::transport::{RawResponse, RelayRequest, SealedRequest};

/// Established secure context with one relay server
///
/// The id is assigned by the engine and carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pairing {
    id: String,
    origin: String,
}

impl Pairing {
    pub fn new(id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Relay server this pairing was established with
    pub fn origin(&self) -> &str {
        &self.origin
    }
}

/// External pairing engine
///
/// Any operation may fail with `EngineError::PairingInvalid`, which tells
/// the caller to discard the pairing and re-pair.
#[async_trait]
pub trait PairingEngine: Send + Sync {
    /// One-time engine setup
    async fn initialize(&self) -> Result<(), EngineError>;

    /// Perform a fresh handshake with a relay server
    async fn handshake(&self, origin: &str) -> Result<Pairing, EngineError>;

    /// Discard a pairing's state
    fn forget(&self, pairing: &Pairing);

    /// Whether pairing material should survive a process restart
    fn set_persist_pairs(&self, persist: bool);

    /// Seal the headers named in `headers_to_encrypt` and the body
    async fn seal_request(
        &self,
        pairing: &Pairing,
        request: &RelayRequest,
    ) -> Result<SealedRequest, EngineError>;

    /// Open a sealed response (headers and any buffered body)
    async fn open_response(
        &self,
        pairing: &Pairing,
        response: RawResponse,
    ) -> Result<RawResponse, EngineError>;

    /// Seal one chunk of a streamed request body
    async fn seal_chunk(&self, pairing: &Pairing, chunk: Bytes) -> Result<Bytes, EngineError>;

    /// Open one chunk of a streamed response body
    async fn open_chunk(&self, pairing: &Pairing, chunk: Bytes) -> Result<Bytes, EngineError>;
}
