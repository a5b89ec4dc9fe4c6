//! Stream lifecycle states
//!
//! ```text
//! Created -> Open <-> Draining
//!    |        |         |
//!    +--------+---------+--> Closed | Errored
//! ```

use std::fmt;

/// Direction of a streamed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    /// Host supplies chunks that are sealed and sent to the relay
    Upload,
    /// Relay response body is opened and written to a local file
    Download,
}

impl fmt::Display for StreamDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload => write!(f, "upload"),
            Self::Download => write!(f, "download"),
        }
    }
}

/// Lifecycle state of one stream handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Handle allocated, sink not yet bound
    Created,
    /// Sink bound; accepting chunks
    Open,
    /// A chunk is being flushed into the sink
    Draining,
    /// Sink finalized and released
    Closed,
    /// Transfer failed; no further writes accepted
    Errored,
}

impl StreamState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: StreamState) -> bool {
        use StreamState::*;
        match (self, next) {
            (Created, Open) => true,
            (Open, Draining) | (Draining, Open) => true,
            (Created | Open | Draining, Closed | Errored) => true,
            _ => false,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Open => "open",
            Self::Draining => "draining",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}
