//! Stream registry, stream states, and the backpressure writer

mod registry;
mod state;
mod writer;

use tokio::io::AsyncWrite;

pub use registry::{CloseAck, PendingWrite, StreamEntry, StreamRegistry, StreamRegistryGuard};
pub use state::{StreamDirection, StreamState};
pub use writer::{StreamWriteError, drain, finish};

/// Destination for one stream's bytes, owned by that stream's task
pub type Sink = Box<dyn AsyncWrite + Send + Unpin>;
