//! Pairing engine seam and the per-server pairing pool

mod engine;
mod pool;

pub use engine::{Pairing, PairingEngine};
pub use pool::{PairingLease, PairingPool};
