//! Error types for relay operations
//!
//! `RelayError` is what commands return. `EngineError` and `TransportError`
//! are raised by the external collaborators and folded into `RelayError`
//! with their upstream description intact.

use relay_common::{ErrorKind, StreamHandle};
use thiserror::Error;

use crate::streams::StreamWriteError;

/// Errors returned by relay commands and carried in terminal stream events
#[derive(Debug, Clone, Error)]
pub enum RelayError {
    /// Malformed or missing arguments; nothing was attempted
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// Operation on a handle that is not open
    #[error("unknown stream: {0}")]
    UnknownStream(StreamHandle),

    /// A sink rejected a write
    #[error(transparent)]
    StreamWrite(#[from] StreamWriteError),

    /// Transport failure or a response that is not HTTP-shaped
    #[error("relay error: {0}")]
    Relay(String),

    /// Handshake with the relay server could not be completed
    #[error("Unable to re-pair with {url}: {reason}")]
    RePairFailed { url: String, reason: String },

    /// Out-of-range setting value
    #[error("settings error: {0}")]
    Settings(String),

    /// Relay used before initialization, or initialization failed
    #[error("init error: {0}")]
    Init(String),
}

impl RelayError {
    /// Machine-readable kind for replies and events
    pub fn kind(&self) -> ErrorKind {
        match self {
            RelayError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            RelayError::UnknownStream(_) => ErrorKind::UnknownStream,
            RelayError::StreamWrite(_) => ErrorKind::StreamWrite,
            RelayError::Relay(_) => ErrorKind::Relay,
            RelayError::RePairFailed { .. } => ErrorKind::RePairFailed,
            RelayError::Settings(_) => ErrorKind::Settings,
            RelayError::Init(_) => ErrorKind::Init,
        }
    }

    /// Whether the failure originated beyond this process
    ///
    /// Upstream failures are reported as `relayError` in stream events,
    /// local ones as `pluginError`.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            RelayError::Relay(_) | RelayError::RePairFailed { .. } | RelayError::Init(_)
        )
    }
}

/// Errors raised by the pairing engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The pairing was rejected or has expired; re-pairing may help
    #[error("pairing is no longer valid: {0}")]
    PairingInvalid(String),

    /// Network hiccup during a handshake; retrying may help
    #[error("transient pairing failure: {0}")]
    Transient(String),

    /// Any other engine failure
    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    /// Returns true if the same operation may succeed when retried
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }

    /// Returns true if the pairing used must be replaced
    pub fn is_pairing_invalid(&self) -> bool {
        matches!(self, EngineError::PairingInvalid(_))
    }
}

impl From<EngineError> for RelayError {
    fn from(err: EngineError) -> Self {
        RelayError::Relay(err.to_string())
    }
}

/// Errors raised by the HTTP transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection failed or dropped
    #[error("network error: {0}")]
    Network(String),

    /// The peer closed the stream before it completed
    #[error("connection closed")]
    Closed,

    /// The transport refused the request before sending it
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Returns true if the failure is a network condition
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Closed)
    }
}

impl From<TransportError> for RelayError {
    fn from(err: TransportError) -> Self {
        RelayError::Relay(err.to_string())
    }
}
