//! Common types and utilities shared across the parley relay stack.
//!
//! This crate provides:
//! - JSON frame encoding and decoding ([`frame`])
//! - Client identifiers and the message status model ([`types`])
//! - Base58 wallet-address helpers ([`base58`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod base58;
pub mod frame;
pub mod types;

pub use frame::{ClientFrame, FrameError, ServerFrame};
pub use types::{ChatMessage, ClientId, MessageId, MessageStatus};
