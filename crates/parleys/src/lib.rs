//! parley relay server: presence-tracked WebSocket message relay.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Identifier validation for `authenticate` frames.
pub mod auth;
/// CLI argument parsing and server configuration.
pub mod config;
/// Error types for relay server operations.
pub mod error;
/// Periodic keepalive probing of registered connections.
pub mod liveness;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
mod ratelimit;
/// Identifier to live connection table.
pub mod registry;
/// Message validation, buffering and push delivery.
pub mod router;
/// Accept loop and shared server state.
pub mod server;
/// Per-connection protocol state machine.
pub mod session;
/// Pending message buffer and expiry.
pub mod store;

pub use server::{run, run_with_shutdown, ServerState};
