//! Relay Common Library
//!
//! Shared command, event, and validation types for the MTE relay client.
//! Nothing in this crate performs I/O; it describes what crosses the
//! boundary between a host application and the relay core.

pub mod body;
mod error_kind;
pub mod protocol;
pub mod stream;
pub mod validators;

pub use error_kind::{
    ERROR_KIND_INIT, ERROR_KIND_INVALID_ARGUMENTS, ERROR_KIND_NOT_IMPLEMENTED, ERROR_KIND_RELAY,
    ERROR_KIND_RE_PAIR_FAILED, ERROR_KIND_SETTINGS, ERROR_KIND_STREAM_WRITE,
    ERROR_KIND_UNKNOWN_STREAM, ErrorKind,
};
pub use stream::StreamHandle;

/// Default size of one sealed chunk in a streamed transfer (64KB)
pub const DEFAULT_STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Largest accepted stream chunk size (16MB)
pub const MAX_STREAM_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Default number of pairings kept per relay server
pub const DEFAULT_PAIR_POOL_SIZE: usize = 5;

/// Largest accepted pairing pool size
pub const MAX_PAIR_POOL_SIZE: usize = 64;

/// Pairing material survives restarts unless the host opts out
pub const DEFAULT_PERSIST_PAIRS: bool = true;

/// HTTP methods the relay accepts for data tasks
pub const SUPPORTED_HTTP_METHODS: &[&str] = &[
    "DELETE", "GET", "HEAD", "OPTIONS", "PATCH", "POST", "PUT", "TRACE",
];

/// HTTP methods that must carry a request body
pub const METHODS_REQUIRING_BODY: &[&str] = &["PATCH", "POST", "PUT"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_within_limits() {
        assert!(DEFAULT_STREAM_CHUNK_SIZE > 0);
        assert!(DEFAULT_STREAM_CHUNK_SIZE <= MAX_STREAM_CHUNK_SIZE);
        assert!(DEFAULT_PAIR_POOL_SIZE > 0);
        assert!(DEFAULT_PAIR_POOL_SIZE <= MAX_PAIR_POOL_SIZE);
    }

    #[test]
    fn test_supported_methods_sorted() {
        let mut sorted = SUPPORTED_HTTP_METHODS.to_vec();
        sorted.sort();
        assert_eq!(SUPPORTED_HTTP_METHODS, sorted.as_slice());
    }

    #[test]
    fn test_body_methods_subset() {
        for method in METHODS_REQUIRING_BODY {
            assert!(
                SUPPORTED_HTTP_METHODS.contains(method),
                "METHODS_REQUIRING_BODY contains '{}' which is not supported",
                method
            );
        }
    }
}
