//! parley relay client: reconnecting WebSocket link with a small CLI.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Exponential backoff and the reconnect state machine.
pub mod backoff;
/// CLI parsing and client configuration.
pub mod config;
/// WebSocket relay connection manager.
pub mod relay;
