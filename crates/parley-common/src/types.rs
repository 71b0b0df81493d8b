//! Core type definitions and protocol constants for parley.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Maximum length in bytes of a client identifier.
pub const MAX_CLIENT_ID_LEN: usize = 128;

/// Opaque client identifier (a wallet address in practice).
///
/// The relay never interprets the contents; it is the sole routing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wraps an identifier string without validation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Relay-assigned message identifier (UUID v4 text).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle status of a relayed message.
///
/// Transitions only move forward:
/// `Pending → {Delivered, Expired}`, `Delivered → {Read, Expired}`,
/// `Read → Expired`. `Pending → Read` is also allowed since a client may
/// read a message without acknowledging it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Stored, not yet acknowledged by the recipient.
    Pending,
    /// Acknowledged by the recipient.
    Delivered,
    /// Read by the recipient; expiry is scheduled.
    Read,
    /// Past its expiry; removed by the next sweep.
    Expired,
}

impl MessageStatus {
    /// Returns `true` if moving from `self` to `next` is a forward transition.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Delivered | Self::Read | Self::Expired)
                | (Self::Delivered, Self::Read | Self::Expired)
                | (Self::Read, Self::Expired)
        )
    }
}

/// A message held by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Relay-assigned identifier.
    pub id: MessageId,
    /// Authenticated sender as claimed in the frame.
    pub sender: ClientId,
    /// Destination identifier.
    pub recipient: ClientId,
    /// Opaque content; the relay never inspects it.
    pub content: String,
    /// When the relay accepted the message.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: MessageStatus,
    /// When the recipient marked the message read.
    pub read_at: Option<DateTime<Utc>>,
    /// When the message becomes eligible for sweeping.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Creates a `Pending` message with a fresh id.
    #[must_use]
    pub fn new(
        sender: ClientId,
        recipient: ClientId,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            sender,
            recipient,
            content,
            created_at,
            status: MessageStatus::Pending,
            read_at: None,
            expires_at: None,
        }
    }

    /// Move to `next` if the transition is forward. Returns whether it moved.
    pub fn advance(&mut self, next: MessageStatus) -> bool {
        if self.status.can_advance_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Returns `true` if an expiry is set and has passed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg() -> ChatMessage {
        ChatMessage::new("alice".into(), "bob".into(), "hi".into(), Utc::now())
    }

    #[test]
    fn new_message_is_pending_without_expiry() {
        let m = msg();
        assert_eq!(m.status, MessageStatus::Pending);
        assert!(m.expires_at.is_none());
        assert!(m.read_at.is_none());
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(msg().id, msg().id);
    }

    #[test]
    fn forward_transitions_allowed() {
        use MessageStatus::*;
        assert!(Pending.can_advance_to(Delivered));
        assert!(Pending.can_advance_to(Read));
        assert!(Pending.can_advance_to(Expired));
        assert!(Delivered.can_advance_to(Read));
        assert!(Delivered.can_advance_to(Expired));
        assert!(Read.can_advance_to(Expired));
    }

    #[test]
    fn backward_and_self_transitions_rejected() {
        use MessageStatus::*;
        for from in [Pending, Delivered, Read, Expired] {
            assert!(!from.can_advance_to(from));
        }
        assert!(!Delivered.can_advance_to(Pending));
        assert!(!Read.can_advance_to(Pending));
        assert!(!Read.can_advance_to(Delivered));
        for to in [Pending, Delivered, Read] {
            assert!(!Expired.can_advance_to(to));
        }
    }

    #[test]
    fn advance_refuses_backward_move() {
        let mut m = msg();
        assert!(m.advance(MessageStatus::Read));
        assert!(!m.advance(MessageStatus::Delivered));
        assert_eq!(m.status, MessageStatus::Read);
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        let now = Utc::now();
        let mut m = msg();
        assert!(!m.is_expired_at(now));
        m.expires_at = Some(now);
        assert!(m.is_expired_at(now));
        assert!(!m.is_expired_at(now - Duration::seconds(1)));
    }

    #[test]
    fn status_serializes_lowercase() {
        let s = serde_json::to_string(&MessageStatus::Delivered).unwrap();
        assert_eq!(s, "\"delivered\"");
    }
}
