//! Relay client constants

/// Application directory name under the platform config dir
pub const APP_DIR_NAME: &str = "mte-relay";

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "relay.json";

/// Suffix for incomplete download files
pub const PART_SUFFIX: &str = ".part";

/// Chunks queued per upload before `writeToStream` callers wait
pub const STREAM_INBOX_CAPACITY: usize = 16;

/// Message returned when no setting changed
pub const SETTINGS_UNCHANGED_MESSAGE: &str =
    "No Relay Settings were changed based on arguments and existing RelaySettings";

/// Message for responses that carry no HTTP status
pub const NOT_HTTP_RESPONSE_MESSAGE: &str = "Unable to interpret response as an HTTP response";

/// Message attached to downloads closed by the host
pub const DOWNLOAD_CANCELLED_MESSAGE: &str = "Download cancelled";

/// Environment variable consulted for log filters
pub const LOG_ENV_VAR: &str = "RUST_LOG";
