//! Request body decoding and response header normalization
//!
//! Hosts hand request bodies over either as raw bytes or as text. Text is
//! treated as base64 when it decodes cleanly and as UTF-8 otherwise.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request body as supplied by the host
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestBody {
    /// Raw bytes (a JSON array of numbers on the wire)
    Bytes(Vec<u8>),
    /// Base64 text, or plain UTF-8 text when it is not valid base64
    Text(String),
}

impl RequestBody {
    /// Resolve the body into the bytes that will be sealed and sent
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RequestBody::Bytes(bytes) => bytes,
            RequestBody::Text(text) => decode_body_text(&text),
        }
    }

    /// Whether the body carries no bytes at all
    pub fn is_empty(&self) -> bool {
        match self {
            RequestBody::Bytes(bytes) => bytes.is_empty(),
            RequestBody::Text(text) => text.is_empty(),
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Bytes(bytes) => write!(f, "Bytes(<{} bytes>)", bytes.len()),
            RequestBody::Text(text) => write!(f, "Text(<{} chars>)", text.len()),
        }
    }
}

/// Decode body text: base64 when valid, otherwise the UTF-8 bytes as-is
pub fn decode_body_text(text: &str) -> Vec<u8> {
    match STANDARD.decode(text) {
        Ok(decoded) => decoded,
        Err(_) => text.as_bytes().to_vec(),
    }
}

/// Render a header value as a string
///
/// Transports may surface numeric or boolean header values; those are
/// converted with their JSON rendering rather than dropped.
pub fn normalize_header_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Normalize a list of response headers into a string map
pub fn normalize_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a (String, Value)>,
{
    headers
        .into_iter()
        .map(|(name, value)| (name.clone(), normalize_header_value(value)))
        .collect()
}
