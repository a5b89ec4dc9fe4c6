//! Machine-readable error kinds for relay commands
//!
//! These kinds are serialized to strings in command replies and stream
//! events, allowing hosts to branch on the failure class without parsing
//! human-readable messages.

use std::fmt;

/// Malformed or missing arguments; nothing was attempted
pub const ERROR_KIND_INVALID_ARGUMENTS: &str = "invalid_arguments";
/// Operation on a stream handle that is not open
pub const ERROR_KIND_UNKNOWN_STREAM: &str = "unknown_stream";
/// A sink rejected a write
pub const ERROR_KIND_STREAM_WRITE: &str = "stream_write_error";
/// Transport failure or a response that is not HTTP-shaped
pub const ERROR_KIND_RELAY: &str = "relay_error";
/// Handshake with the relay server could not be completed
pub const ERROR_KIND_RE_PAIR_FAILED: &str = "re_pair_failed";
/// Out-of-range configuration value
pub const ERROR_KIND_SETTINGS: &str = "settings_error";
/// Relay not initialized, or initialization failed
pub const ERROR_KIND_INIT: &str = "init_error";
/// Command name not recognized by this relay
pub const ERROR_KIND_NOT_IMPLEMENTED: &str = "not_implemented";

/// Error kinds carried in replies and terminal stream events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidArguments,
    UnknownStream,
    StreamWrite,
    Relay,
    RePairFailed,
    Settings,
    Init,
    NotImplemented,
}

impl ErrorKind {
    /// Convert to the string representation used on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArguments => ERROR_KIND_INVALID_ARGUMENTS,
            Self::UnknownStream => ERROR_KIND_UNKNOWN_STREAM,
            Self::StreamWrite => ERROR_KIND_STREAM_WRITE,
            Self::Relay => ERROR_KIND_RELAY,
            Self::RePairFailed => ERROR_KIND_RE_PAIR_FAILED,
            Self::Settings => ERROR_KIND_SETTINGS,
            Self::Init => ERROR_KIND_INIT,
            Self::NotImplemented => ERROR_KIND_NOT_IMPLEMENTED,
        }
    }

    /// Parse from the wire string (for host-side handling)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            ERROR_KIND_INVALID_ARGUMENTS => Some(Self::InvalidArguments),
            ERROR_KIND_UNKNOWN_STREAM => Some(Self::UnknownStream),
            ERROR_KIND_STREAM_WRITE => Some(Self::StreamWrite),
            ERROR_KIND_RELAY => Some(Self::Relay),
            ERROR_KIND_RE_PAIR_FAILED => Some(Self::RePairFailed),
            ERROR_KIND_SETTINGS => Some(Self::Settings),
            ERROR_KIND_INIT => Some(Self::Init),
            ERROR_KIND_NOT_IMPLEMENTED => Some(Self::NotImplemented),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ErrorKind> for String {
    fn from(kind: ErrorKind) -> Self {
        kind.as_str().to_string()
    }
}
