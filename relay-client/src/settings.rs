//! Settings store
//!
//! Readers take snapshots from a `watch` channel and never wait on a
//! writer. Writers are serialized: a patch is validated as a whole, then
//! only the values that actually change are applied to the pool.
//! Transfers read the chunk size once when they start, so a change only
//! affects transfers started afterwards.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use relay_common::protocol::SettingsArgs;
use relay_common::validators::{
    SettingValueError, validate_pair_pool_size, validate_stream_chunk_size,
};
use relay_common::{DEFAULT_PAIR_POOL_SIZE, DEFAULT_PERSIST_PAIRS, DEFAULT_STREAM_CHUNK_SIZE};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use crate::constants::SETTINGS_UNCHANGED_MESSAGE;
use crate::error::RelayError;
use crate::pairing::PairingPool;

/// Relay session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Bytes per sealed chunk in streamed transfers
    #[serde(default = "default_stream_chunk_size")]
    pub stream_chunk_size: usize,

    /// Pairings kept per relay server
    #[serde(default = "default_pair_pool_size")]
    pub pair_pool_size: usize,

    /// Keep pairing material across restarts
    #[serde(default = "default_persist_pairs")]
    pub persist_pairs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stream_chunk_size: DEFAULT_STREAM_CHUNK_SIZE,
            pair_pool_size: DEFAULT_PAIR_POOL_SIZE,
            persist_pairs: DEFAULT_PERSIST_PAIRS,
        }
    }
}

impl Settings {
    /// Range-check every value
    ///
    /// # Errors
    ///
    /// Returns the wire name of the first out-of-range field and what is
    /// wrong with it.
    pub fn check(&self) -> Result<(), (&'static str, SettingValueError)> {
        let chunk = i64::try_from(self.stream_chunk_size).unwrap_or(i64::MAX);
        validate_stream_chunk_size(chunk).map_err(|e| ("streamChunkSize", e))?;
        let pool = i64::try_from(self.pair_pool_size).unwrap_or(i64::MAX);
        validate_pair_pool_size(pool).map_err(|e| ("pairPoolSize", e))?;
        Ok(())
    }
}

fn default_stream_chunk_size() -> usize {
    DEFAULT_STREAM_CHUNK_SIZE
}

fn default_pair_pool_size() -> usize {
    DEFAULT_PAIR_POOL_SIZE
}

fn default_persist_pairs() -> bool {
    DEFAULT_PERSIST_PAIRS
}

/// One setting that changed value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingChange {
    StreamChunkSize(usize),
    PairPoolSize(usize),
    PersistPairs(bool),
}

impl fmt::Display for SettingChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamChunkSize(v) => write!(f, "RelaySetting.streamChunkSize adjusted to {v}"),
            Self::PairPoolSize(v) => write!(f, "RelaySetting.pairPoolSize adjusted to {v}"),
            Self::PersistPairs(v) => write!(f, "RelaySetting.persistPairs adjusted to {v}"),
        }
    }
}

/// Result of applying a settings patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(Vec<SettingChange>),
    Unchanged,
}

impl ApplyOutcome {
    /// Host-facing summary, one line per changed setting
    pub fn summary(&self) -> String {
        match self {
            Self::Applied(changes) => changes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
            Self::Unchanged => SETTINGS_UNCHANGED_MESSAGE.to_string(),
        }
    }
}

/// Current settings plus the side effects of changing them
pub struct SettingsStore {
    current: watch::Sender<Settings>,
    write_lock: Mutex<()>,
    pool: Arc<PairingPool>,
}

impl SettingsStore {
    pub fn new(initial: Settings, pool: Arc<PairingPool>) -> Self {
        let (current, _) = watch::channel(initial);
        Self {
            current,
            write_lock: Mutex::new(()),
            pool,
        }
    }

    /// Snapshot of the current settings
    pub fn get(&self) -> Settings {
        *self.current.borrow()
    }

    /// Receiver that always sees the latest settings
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.current.subscribe()
    }

    /// Validate and apply a patch
    ///
    /// Absent fields are left alone. Nothing is applied unless every
    /// present field is valid. The pool is only resized or told about
    /// persistence when the value differs from the current one.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Settings` for out-of-range values.
    pub fn apply(&self, patch: &SettingsArgs) -> Result<ApplyOutcome, RelayError> {
        let _writer = self.write_lock.lock();

        let chunk_size = patch
            .stream_chunk_size
            .map(validate_stream_chunk_size)
            .transpose()
            .map_err(|e| RelayError::Settings(format!("streamChunkSize {e}")))?;
        let pool_size = patch
            .pair_pool_size
            .map(validate_pair_pool_size)
            .transpose()
            .map_err(|e| RelayError::Settings(format!("pairPoolSize {e}")))?;

        let current = self.get();
        let mut next = current;
        let mut changes = Vec::new();

        if let Some(size) = chunk_size
            && size != current.stream_chunk_size
        {
            next.stream_chunk_size = size;
            changes.push(SettingChange::StreamChunkSize(size));
        }
        if let Some(size) = pool_size
            && size != current.pair_pool_size
        {
            next.pair_pool_size = size;
            changes.push(SettingChange::PairPoolSize(size));
            self.pool.resize(size);
        }
        if let Some(persist) = patch.persist_pairs
            && persist != current.persist_pairs
        {
            next.persist_pairs = persist;
            changes.push(SettingChange::PersistPairs(persist));
            self.pool.set_persist(persist);
        }

        if changes.is_empty() {
            return Ok(ApplyOutcome::Unchanged);
        }

        self.current.send_replace(next);
        for change in &changes {
            info!("{change}");
        }
        Ok(ApplyOutcome::Applied(changes))
    }
}
