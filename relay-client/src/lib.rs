//! MTE Relay Client Library
//!
//! Streaming transfer and session-settings manager for the MTE relay
//! client. The pairing engine and the HTTP transport are supplied by the
//! host as trait objects; this crate owns the pairing pool, the stream
//! registry, backpressured sink writes, and the transfer state machine.

pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod pairing;
pub mod relay;
pub mod settings;
pub mod streams;
pub mod transfers;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::RelayConfig;
pub use dispatcher::Dispatcher;
pub use error::{EngineError, RelayError, TransportError};
pub use relay::Relay;
pub use settings::Settings;
