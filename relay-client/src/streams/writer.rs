//! Backpressure writer
//!
//! Drains a buffer into a sink one accepted write at a time. When the sink
//! is not ready its `poll_write` returns `Pending` and the task suspends
//! until the sink wakes it, so a slow consumer never occupies a worker
//! thread.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A sink rejected a write
///
/// `written` counts the bytes the sink accepted before the failure; they
/// stay written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stream write failed after {written} bytes: {message}")]
pub struct StreamWriteError {
    pub written: usize,
    pub message: String,
}

impl StreamWriteError {
    pub fn new(written: usize, message: impl Into<String>) -> Self {
        Self {
            written,
            message: message.into(),
        }
    }
}

/// Write all of `buffer` into `sink`, honoring the sink's readiness
///
/// Each attempt writes as much as the sink accepts and advances the cursor
/// by exactly that amount. A write of zero bytes means the sink is closed.
///
/// # Errors
///
/// Returns `StreamWriteError` with the sink's error text and the number of
/// bytes accepted before the failure.
pub async fn drain<W>(sink: &mut W, buffer: &[u8]) -> Result<usize, StreamWriteError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut cursor = 0;
    while cursor < buffer.len() {
        match sink.write(&buffer[cursor..]).await {
            Ok(0) => {
                return Err(StreamWriteError::new(
                    cursor,
                    "sink closed before accepting all bytes",
                ));
            }
            Ok(n) => cursor += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StreamWriteError::new(cursor, e.to_string())),
        }
    }
    Ok(cursor)
}

/// Flush and shut down a sink once its last chunk is drained
///
/// # Errors
///
/// Returns `StreamWriteError` if the sink fails to flush or close.
pub async fn finish<W>(sink: &mut W) -> Result<(), StreamWriteError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    sink.flush()
        .await
        .map_err(|e| StreamWriteError::new(0, e.to_string()))?;
    sink.shutdown()
        .await
        .map_err(|e| StreamWriteError::new(0, e.to_string()))
}
