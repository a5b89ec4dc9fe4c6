//! JSON command boundary
//!
//! Hosts send `{"method": <name>, "arguments": {...}}` and get a
//! `CommandReply` back. Streamed transfers report through the relay's
//! event channel, not through replies.

use std::sync::Arc;

use bytes::Bytes;
use relay_common::ErrorKind;
use relay_common::protocol::{Command, CommandReply, CommandResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::relay::Relay;

/// Routes host commands to a [`Relay`]
#[derive(Clone)]
pub struct Dispatcher {
    relay: Arc<Relay>,
}

impl Dispatcher {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }

    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// Parse and run one JSON command
    ///
    /// Unknown methods reply `not_implemented`. Malformed JSON or
    /// arguments reply `invalid_arguments` without side effects.
    pub async fn dispatch_json(&self, json: &str) -> CommandReply {
        let mut value: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                return CommandReply::error(
                    ErrorKind::InvalidArguments,
                    format!("malformed command: {e}"),
                );
            }
        };

        let Some(method) = value
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            return CommandReply::error(ErrorKind::InvalidArguments, "missing method");
        };
        if !Command::METHODS.contains(&method.as_str()) {
            debug!(method = %method, "unknown method");
            return CommandReply::error(
                ErrorKind::NotImplemented,
                format!("method {method} is not implemented"),
            );
        }
        if Command::WITHOUT_ARGUMENTS.contains(&method.as_str()) {
            strip_empty_arguments(&mut value);
        }

        match serde_json::from_value::<Command>(value) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => CommandReply::error(
                ErrorKind::InvalidArguments,
                format!("invalid arguments: {e}"),
            ),
        }
    }

    /// Run one command
    pub async fn dispatch(&self, command: Command) -> CommandReply {
        let method = command.method();
        debug!(method, "dispatching command");

        match self.run(command).await {
            Ok(result) => CommandReply::Ok { result },
            Err(e) => {
                warn!(method, kind = %e.kind(), error = %e, "command failed");
                CommandReply::error(e.kind(), e.to_string())
            }
        }
    }

    async fn run(&self, command: Command) -> Result<CommandResult, RelayError> {
        let relay = &self.relay;
        let result = match command {
            Command::GetPlatformVersion => CommandResult::PlatformVersion {
                version: relay.platform_version(),
            },
            Command::InitializeRelay => {
                relay.initialize_relay().await?;
                CommandResult::Initialized
            }
            Command::DataTask(args) => CommandResult::DataTask(relay.data_task(args).await?),
            Command::UploadFile(args) => CommandResult::StreamOpened {
                stream_id: relay.upload_file_stream(args)?,
            },
            Command::DownloadFile(args) => CommandResult::StreamOpened {
                stream_id: relay.download_file_stream(args)?,
            },
            Command::RePair { url } => CommandResult::RePaired {
                message: relay.re_pair(&url).await?,
            },
            Command::AdjustRelaySettings(patch) => CommandResult::SettingsAdjusted {
                message: relay.adjust_relay_settings(&patch)?,
            },
            Command::WriteToStream { stream_id, data } => CommandResult::ChunkWritten {
                bytes_written: relay.write_to_stream(stream_id, Bytes::from(data)).await?,
            },
            Command::CloseStream { stream_id } => {
                relay.close_stream(stream_id).await?;
                CommandResult::StreamClosed { stream_id }
            }
        };
        Ok(result)
    }
}

/// Drop an `arguments` that is `{}` or `null`
fn strip_empty_arguments(value: &mut Value) {
    if let Some(command) = value.as_object_mut()
        && command
            .get("arguments")
            .is_some_and(|args| args.is_null() || args.as_object().is_some_and(|a| a.is_empty()))
    {
        command.remove("arguments");
    }
}
