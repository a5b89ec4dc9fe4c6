//! HTTP transport seam and request/response envelopes
//!
//! The transport moves sealed requests to the relay server and hands back
//! raw responses. It knows nothing about pairings; everything it sees has
//! already been sealed by the pairing engine.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bytes::Bytes;
use relay_common::body::normalize_headers;
use relay_common::validators::{HttpMethod, cleartext_header_names, relay_origin};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::constants::NOT_HTTP_RESPONSE_MESSAGE;
use crate::error::{RelayError, TransportError};
use crate::streams::Sink;

/// Cleartext request built from validated host arguments
#[derive(Clone)]
pub struct RelayRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// Names of headers the engine must seal
    pub headers_to_encrypt: Vec<String>,
    pub body: Option<Bytes>,
    /// Path prefix the relay server strips before forwarding
    pub pathname_prefix: Option<String>,
}

impl RelayRequest {
    /// Relay server this request is bound to (`scheme://host:port`)
    pub fn origin(&self) -> String {
        relay_origin(&self.url)
    }

    /// `Content-Length` declared by the host, if any
    pub fn content_length(&self) -> Option<u64> {
        content_length(&self.headers)
    }
}

impl std::fmt::Debug for RelayRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayRequest")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field(
                "headers",
                &cleartext_header_names(&self.headers, &self.headers_to_encrypt),
            )
            .field("headers_to_encrypt", &self.headers_to_encrypt.len())
            .field("body", &self.body.as_ref().map(Bytes::len))
            .field("pathname_prefix", &self.pathname_prefix)
            .finish()
    }
}

/// Request after the pairing engine has sealed headers and body
#[derive(Clone)]
pub struct SealedRequest {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl std::fmt::Debug for SealedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedRequest")
            .field("url", &self.url.as_str())
            .field("method", &self.method)
            .field("headers", &self.headers.len())
            .field("body", &self.body.as_ref().map(Bytes::len))
            .finish()
    }
}

/// Response exactly as the transport produced it
///
/// `status` is `None` when the transport could not read an HTTP status
/// line. Header values are left as JSON values since some transports
/// surface numbers and booleans.
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: Option<u16>,
    pub headers: Vec<(String, Value)>,
    pub body: Bytes,
}

impl RawResponse {
    /// Check the response is HTTP-shaped and normalize its headers
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Relay` when there is no status code.
    pub fn into_http(self) -> Result<HttpResponse, RelayError> {
        let status = self
            .status
            .ok_or_else(|| RelayError::Relay(NOT_HTTP_RESPONSE_MESSAGE.to_string()))?;
        Ok(HttpResponse {
            status,
            headers: normalize_headers(&self.headers),
            body: self.body,
        })
    }
}

/// Checked HTTP response with string headers
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_length(&self) -> Option<u64> {
        content_length(&self.headers)
    }
}

/// Parse `Content-Length` from a header map (name compared case-insensitively)
pub fn content_length(headers: &BTreeMap<String, String>) -> Option<u64> {
    headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// Open upload: a body sink plus the response that arrives after it closes
pub struct UploadChannel {
    pub body: Sink,
    pub response: oneshot::Receiver<Result<RawResponse, TransportError>>,
}

/// Open download: response head plus its body chunks in arrival order
///
/// The body ends when the sender is dropped.
pub struct DownloadChannel {
    pub head: RawResponse,
    pub body: mpsc::Receiver<Result<Bytes, TransportError>>,
}

/// External HTTP transport
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Send a complete request and wait for the complete response
    async fn send(&self, request: SealedRequest) -> Result<RawResponse, TransportError>;

    /// Start a request whose body is streamed through the returned sink
    async fn open_upload(&self, request: SealedRequest) -> Result<UploadChannel, TransportError>;

    /// Send a request and stream its response body
    async fn open_download(&self, request: SealedRequest)
    -> Result<DownloadChannel, TransportError>;
}
