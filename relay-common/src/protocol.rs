//! Command and event definitions for the relay boundary
//!
//! Hosts invoke operations with a JSON object of the form
//! `{"method": <name>, "arguments": {...}}` and receive a `CommandReply`.
//! Asynchronous notifications (progress, stream completion, relay
//! messages) are delivered as `RelayEvent`s using the same shape.
//!
//! ## Header Confidentiality
//!
//! Header values and bodies never appear in `Debug` output, and neither do
//! the names of headers listed in `headersToEncrypt`. Logging a command or
//! event therefore cannot leak what the engine is asked to seal.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::body::RequestBody;
use crate::stream::StreamHandle;
use crate::validators::cleartext_header_names;

// =============================================================================
// Commands
// =============================================================================

/// Arguments for `relayDataTask`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataTaskArgs {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub headers_to_encrypt: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<RequestBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathname_prefix: Option<String>,
}

/// Arguments for `relayUploadFile`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadArgs {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub headers_to_encrypt: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathname_prefix: Option<String>,
    /// Size of the source, when the host knows it up front
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}

/// Arguments for `relayDownloadFile`
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadArgs {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub headers_to_encrypt: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pathname_prefix: Option<String>,
    pub download_location: String,
}

/// Arguments for `adjustRelaySettings`; absent fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsArgs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_chunk_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair_pool_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_pairs: Option<bool>,
}

/// Host requests
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum Command {
    /// Report the platform the relay runs on
    #[serde(rename = "getPlatformVersion")]
    GetPlatformVersion,
    /// Initialize the pairing engine (must come first)
    #[serde(rename = "initializeRelay")]
    InitializeRelay,
    /// Send one request through the relay and return the full response
    #[serde(rename = "relayDataTask")]
    DataTask(DataTaskArgs),
    /// Open a streamed upload; chunks follow via `writeToStream`
    #[serde(rename = "relayUploadFile")]
    UploadFile(UploadArgs),
    /// Open a streamed download into a local file
    #[serde(rename = "relayDownloadFile")]
    DownloadFile(DownloadArgs),
    /// Discard pairings for a relay server and handshake again
    #[serde(rename = "rePair")]
    RePair { url: String },
    /// Change chunk size, pool size, or persistence
    #[serde(rename = "adjustRelaySettings")]
    AdjustRelaySettings(SettingsArgs),
    /// Submit one chunk to an open upload
    #[serde(rename = "writeToStream")]
    WriteToStream {
        #[serde(rename = "streamID")]
        stream_id: StreamHandle,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Finish an upload, or cancel a download
    #[serde(rename = "closeStream")]
    CloseStream {
        #[serde(rename = "streamID")]
        stream_id: StreamHandle,
    },
}

impl Command {
    /// Every method name the relay answers to
    pub const METHODS: &'static [&'static str] = &[
        "adjustRelaySettings",
        "closeStream",
        "getPlatformVersion",
        "initializeRelay",
        "rePair",
        "relayDataTask",
        "relayDownloadFile",
        "relayUploadFile",
        "writeToStream",
    ];

    /// Methods that take no arguments
    pub const WITHOUT_ARGUMENTS: &'static [&'static str] =
        &["getPlatformVersion", "initializeRelay"];

    /// Wire name of this command
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Command::GetPlatformVersion => "getPlatformVersion",
            Command::InitializeRelay => "initializeRelay",
            Command::DataTask(_) => "relayDataTask",
            Command::UploadFile(_) => "relayUploadFile",
            Command::DownloadFile(_) => "relayDownloadFile",
            Command::RePair { .. } => "rePair",
            Command::AdjustRelaySettings(_) => "adjustRelaySettings",
            Command::WriteToStream { .. } => "writeToStream",
            Command::CloseStream { .. } => "closeStream",
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Outcome of a `relayDataTask`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataTaskResponse {
    pub success: bool,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Successful command results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandResult {
    PlatformVersion {
        version: String,
    },
    Initialized,
    DataTask(DataTaskResponse),
    StreamOpened {
        #[serde(rename = "streamID")]
        stream_id: StreamHandle,
    },
    ChunkWritten {
        bytes_written: u64,
    },
    StreamClosed {
        #[serde(rename = "streamID")]
        stream_id: StreamHandle,
    },
    RePaired {
        message: String,
    },
    SettingsAdjusted {
        message: String,
    },
}

/// Reply to a host command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandReply {
    Ok { result: CommandResult },
    Error { code: String, message: String },
}

impl CommandReply {
    /// Build an error reply from an error kind and message
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        CommandReply::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether this reply reports success
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandReply::Ok { .. })
    }
}

// =============================================================================
// Events
// =============================================================================

/// Terminal state of a streamed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOutcome {
    Closed,
    Errored,
}

/// Final report for one streamed transfer
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
    #[serde(rename = "streamID")]
    pub stream_id: StreamHandle,
    pub success: bool,
    pub state: StreamOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(default, with = "base64_bytes_opt", skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<u8>>,
    /// Error reported by the relay, transport, or pairing engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_error: Option<String>,
    /// Error raised by this core (sink failures, cancellation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_error: Option<String>,
}

/// Asynchronous notifications to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum RelayEvent {
    /// An upload body stream is ready to accept chunks
    #[serde(rename = "getFileStream")]
    GetFileStream {
        #[serde(rename = "streamID")]
        stream_id: StreamHandle,
    },
    /// Fraction of a transfer completed, in `[0, 1]`
    #[serde(rename = "streamCompletionPercentage")]
    StreamCompletionPercentage {
        #[serde(rename = "streamID")]
        stream_id: StreamHandle,
        fraction: f64,
    },
    /// Terminal report; exactly one per transfer
    #[serde(rename = "relayStreamResponse")]
    RelayStreamResponse(StreamResponse),
    /// Human-readable relay status line
    #[serde(rename = "relayResponseMessage")]
    RelayResponseMessage { message: String },
}

impl RelayEvent {
    /// Stream this event belongs to, if any
    pub fn stream_id(&self) -> Option<StreamHandle> {
        match self {
            RelayEvent::GetFileStream { stream_id }
            | RelayEvent::StreamCompletionPercentage { stream_id, .. } => Some(*stream_id),
            RelayEvent::RelayStreamResponse(response) => Some(response.stream_id),
            RelayEvent::RelayResponseMessage { .. } => None,
        }
    }

    /// Whether this event ends a transfer
    pub fn is_terminal(&self) -> bool {
        matches!(self, RelayEvent::RelayStreamResponse(_))
    }
}

/// Format a relay status line
pub fn relay_response_message(success: bool, message: &str, error: Option<&str>) -> String {
    format!("Relay Response: {success} {message} {}", error.unwrap_or(""))
}

// =============================================================================
// Debug (redacting)
// =============================================================================

fn header_names(headers: &BTreeMap<String, String>) -> Vec<&str> {
    headers.keys().map(String::as_str).collect()
}

fn byte_count(data: &Option<Vec<u8>>) -> Option<String> {
    data.as_ref().map(|d| format!("<{} bytes>", d.len()))
}

impl std::fmt::Debug for DataTaskArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTaskArgs")
            .field("url", &self.url)
            .field("method", &self.method)
            .field(
                "headers",
                &cleartext_header_names(&self.headers, &self.headers_to_encrypt),
            )
            .field("headers_to_encrypt", &self.headers_to_encrypt.len())
            .field("body", &self.body)
            .field("pathname_prefix", &self.pathname_prefix)
            .finish()
    }
}

impl std::fmt::Debug for UploadArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadArgs")
            .field("url", &self.url)
            .field("method", &self.method)
            .field(
                "headers",
                &cleartext_header_names(&self.headers, &self.headers_to_encrypt),
            )
            .field("headers_to_encrypt", &self.headers_to_encrypt.len())
            .field("pathname_prefix", &self.pathname_prefix)
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

impl std::fmt::Debug for DownloadArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadArgs")
            .field("url", &self.url)
            .field("method", &self.method)
            .field(
                "headers",
                &cleartext_header_names(&self.headers, &self.headers_to_encrypt),
            )
            .field("headers_to_encrypt", &self.headers_to_encrypt.len())
            .field("pathname_prefix", &self.pathname_prefix)
            .field("download_location", &self.download_location)
            .finish()
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::GetPlatformVersion => f.write_str("GetPlatformVersion"),
            Command::InitializeRelay => f.write_str("InitializeRelay"),
            Command::DataTask(args) => f.debug_tuple("DataTask").field(args).finish(),
            Command::UploadFile(args) => f.debug_tuple("UploadFile").field(args).finish(),
            Command::DownloadFile(args) => f.debug_tuple("DownloadFile").field(args).finish(),
            Command::RePair { url } => f.debug_struct("RePair").field("url", url).finish(),
            Command::AdjustRelaySettings(args) => {
                f.debug_tuple("AdjustRelaySettings").field(args).finish()
            }
            Command::WriteToStream { stream_id, data } => f
                .debug_struct("WriteToStream")
                .field("stream_id", stream_id)
                .field("data", &format!("<{} bytes>", data.len()))
                .finish(),
            Command::CloseStream { stream_id } => f
                .debug_struct("CloseStream")
                .field("stream_id", stream_id)
                .finish(),
        }
    }
}

impl std::fmt::Debug for DataTaskResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataTaskResponse")
            .field("success", &self.success)
            .field("data", &byte_count(&self.data))
            .field("headers", &header_names(&self.headers))
            .field("error", &self.error)
            .finish()
    }
}

impl std::fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResponse")
            .field("stream_id", &self.stream_id)
            .field("success", &self.success)
            .field("state", &self.state)
            .field("headers", &self.headers.as_ref().map(header_names))
            .field("data", &byte_count(&self.data))
            .field("relay_error", &self.relay_error)
            .field("plugin_error", &self.plugin_error)
            .finish()
    }
}

// =============================================================================
// Binary payload encoding
// =============================================================================

/// Serialize `Vec<u8>` as standard base64 text
mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Serialize `Option<Vec<u8>>` as optional standard base64 text
mod base64_bytes_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        data: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let text = Option::<String>::deserialize(deserializer)?;
        text.map(|t| STANDARD.decode(t).map_err(serde::de::Error::custom))
            .transpose()
    }
}
