//! Stream handle type
//!
//! A `StreamHandle` identifies one in-progress upload or download. It is
//! created when a transfer starts and is meaningless once the transfer
//! reaches a terminal state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for one streamed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamHandle(Uuid);

impl StreamHandle {
    /// Allocate a fresh random handle
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for StreamHandle {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StreamHandle {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_unique() {
        let a = StreamHandle::new();
        let b = StreamHandle::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_parse() {
        let handle = StreamHandle::new();
        let parsed: StreamHandle = handle.to_string().parse().unwrap();
        assert_eq!(parsed, handle);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not-a-stream".parse::<StreamHandle>().is_err());
        assert!("".parse::<StreamHandle>().is_err());
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let handle = StreamHandle::new();
        let json = serde_json::to_string(&handle).unwrap();
        assert_eq!(json, format!("\"{handle}\""));
    }
}
