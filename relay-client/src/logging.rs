//! Structured logging setup
//!
//! Installs a `tracing` subscriber for the relay. The level comes from a
//! verbosity count unless `RUST_LOG` is set, output goes to stderr or is
//! appended to a file, and records are text or JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::constants::LOG_ENV_VAR;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text
    #[default]
    Text,
    /// One JSON object per record
    Json,
}

/// Errors installing the subscriber
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file: {0}")]
    Io(#[from] std::io::Error),

    /// A global subscriber is already installed
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Level name for a verbosity count (0=error .. 4+=trace)
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// Returns `LoggingError::Io` if the log file cannot be opened and
/// `LoggingError::AlreadyInitialized` if a subscriber is already set.
pub fn init_logging(
    verbosity: u8,
    log_file: Option<&Path>,
    format: LogFormat,
) -> Result<(), LoggingError> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(format!("relay_client={level},relay_common={level}")));
    let detailed = verbosity >= 3;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match (log_file, format) {
        (None, LogFormat::Text) => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(detailed)
                    .with_line_number(detailed),
            )
            .try_init(),
        (None, LogFormat::Json) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (Some(path), LogFormat::Text) => {
            let file = open_append(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(file)
                        .with_ansi(false)
                        .with_target(true)
                        .with_file(detailed)
                        .with_line_number(detailed),
                )
                .try_init()
        }
        (Some(path), LogFormat::Json) => {
            let file = open_append(path)?;
            registry
                .with(fmt::layer().json().with_writer(file))
                .try_init()
        }
    };

    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().create(true).append(true).open(path)
}
