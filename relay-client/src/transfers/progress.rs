//! Transfer progress tracking
//!
//! Counters are atomics so the registry can report progress while the
//! owning task updates it without locks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live byte counters for one transfer
///
/// `bytes_completed` only grows. A total of 0 means the size is unknown.
#[derive(Debug, Default)]
pub struct TransferProgress {
    bytes_completed: AtomicU64,
    total_bytes: AtomicU64,
}

impl TransferProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            bytes_completed: AtomicU64::new(0),
            total_bytes: AtomicU64::new(total_bytes.unwrap_or(0)),
        }
    }

    /// Record bytes moved into the sink, returns the new total
    pub fn add(&self, bytes: u64) -> u64 {
        self.bytes_completed.fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    /// Set the expected size once it is learned (downloads)
    pub fn set_total(&self, total_bytes: u64) {
        self.total_bytes.store(total_bytes, Ordering::Relaxed);
    }

    pub fn bytes_completed(&self) -> u64 {
        self.bytes_completed.load(Ordering::Relaxed)
    }

    /// Expected size, if known
    pub fn total_bytes(&self) -> Option<u64> {
        match self.total_bytes.load(Ordering::Relaxed) {
            0 => None,
            total => Some(total),
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes_completed: self.bytes_completed(),
            total_bytes: self.total_bytes(),
        }
    }
}

/// Point-in-time view of a transfer's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub bytes_completed: u64,
    pub total_bytes: Option<u64>,
}

impl ProgressSnapshot {
    /// Completed fraction in `[0, 1]`, or `None` when the size is unknown
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total_bytes.filter(|&t| t > 0)?;
        Some((self.bytes_completed as f64 / total as f64).min(1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction_after_each_chunk() {
        let progress = TransferProgress::new(Some(1500));
        progress.add(1000);
        let first = progress.snapshot().fraction().unwrap();
        assert!((first - 2.0 / 3.0).abs() < 1e-9);
        progress.add(500);
        assert_eq!(progress.snapshot().fraction(), Some(1.0));
    }

    #[test]
    fn test_unknown_total_skips_fraction() {
        let progress = TransferProgress::new(None);
        progress.add(4096);
        assert_eq!(progress.total_bytes(), None);
        assert_eq!(progress.snapshot().fraction(), None);
    }

    #[test]
    fn test_zero_total_is_unknown() {
        let progress = TransferProgress::new(Some(0));
        assert_eq!(progress.snapshot().fraction(), None);
    }

    #[test]
    fn test_fraction_clamped() {
        // Server sent more than Content-Length announced
        let progress = TransferProgress::new(Some(100));
        progress.add(150);
        assert_eq!(progress.snapshot().fraction(), Some(1.0));
    }

    #[test]
    fn test_total_learned_later() {
        let progress = TransferProgress::new(None);
        progress.add(10);
        progress.set_total(40);
        assert_eq!(progress.snapshot().fraction(), Some(0.25));
    }

    #[test]
    fn test_add_returns_running_total() {
        let progress = TransferProgress::default();
        assert_eq!(progress.add(3), 3);
        assert_eq!(progress.add(4), 7);
        assert_eq!(progress.bytes_completed(), 7);
    }
}
