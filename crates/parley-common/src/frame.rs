//! parley JSON frame encoding and decoding.
//!
//! Every frame is a UTF-8 JSON object sent as a WebSocket text message and
//! tagged by its `"type"` field. Client frames decode once into the closed
//! [`ClientFrame`] enum; unknown tags decode to [`ClientFrame::Unknown`]
//! instead of failing so that newer clients can talk to older relays.

use crate::types::{ChatMessage, ClientId, MessageId, MessageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Human-readable texts carried in `error` frames.
pub mod error_text {
    /// The frame could not be decoded.
    pub const MALFORMED: &str = "Failed to process message";
    /// The recipient has no live connection; the message stays buffered.
    pub const RECIPIENT_OFFLINE: &str = "Recipient is not online";
    /// A frame other than `authenticate` arrived before authentication.
    pub const NOT_AUTHENTICATED: &str = "Not authenticated";
    /// The per-connection rate limit was hit.
    pub const RATE_LIMITED: &str = "Rate limit exceeded";
    /// Message content exceeds the configured maximum.
    pub const PAYLOAD_TOO_LARGE: &str = "Payload too large";
}

/// Text of the `authentication_success` frame.
pub const AUTH_SUCCESS_TEXT: &str = "Successfully authenticated";

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Bind this connection to an identifier.
    Authenticate {
        /// Identifier to register under.
        #[serde(rename = "walletAddress", default)]
        wallet_address: Option<String>,
    },
    /// Send content to another client.
    Message {
        /// Claimed sender identifier.
        #[serde(default)]
        sender: Option<String>,
        /// Destination identifier.
        #[serde(default)]
        recipient: Option<String>,
        /// Opaque content.
        #[serde(default)]
        content: Option<String>,
    },
    /// Mark a buffered message as read.
    MarkRead {
        /// Identifier of the message.
        #[serde(rename = "messageId", default)]
        message_id: Option<String>,
        /// Recipient owning the message.
        #[serde(default)]
        recipient: Option<String>,
    },
    /// Acknowledge receipt of a message.
    Ack {
        /// Identifier of the message.
        #[serde(rename = "messageId", default)]
        message_id: Option<String>,
    },
    /// Application-level keepalive.
    Ping,
    /// Any tag this relay does not understand.
    #[serde(other)]
    Unknown,
}

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// The identifier was registered.
    AuthenticationSuccess {
        /// Confirmation text.
        message: String,
    },
    /// A delivered or backlog message.
    Message {
        /// Relay-assigned message id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
        /// Sender identifier.
        sender: ClientId,
        /// Recipient identifier.
        recipient: ClientId,
        /// Opaque content.
        content: String,
        /// When the relay accepted the message.
        timestamp: DateTime<Utc>,
        /// Status at the time of delivery.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<MessageStatus>,
    },
    /// Acknowledgement to the sender that the relay accepted a message.
    MessageSent {
        /// Relay-assigned message id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
        /// Recipient identifier.
        recipient: ClientId,
        /// When the relay accepted the message.
        timestamp: DateTime<Utc>,
    },
    /// Non-fatal error description.
    Error {
        /// Error text.
        message: String,
    },
    /// Reply to an application-level `ping`.
    Pong {
        /// Relay clock at reply time.
        timestamp: DateTime<Utc>,
    },
}

/// Errors that can occur while decoding or encoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The text is not JSON or lacks a string `type` discriminant.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The frame could not be serialized.
    #[error("frame encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ClientFrame {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] if the text is not a JSON object with
    /// a string `type` field, or a known variant has a field of the wrong type.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley_common::frame::ClientFrame;
    /// let frame = ClientFrame::parse(r#"{"type":"authenticate","walletAddress":"alice"}"#).unwrap();
    /// assert_eq!(frame, ClientFrame::authenticate("alice"));
    /// ```
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Malformed)
    }

    /// Serializes this frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Creates an `authenticate` frame.
    #[must_use]
    pub fn authenticate(wallet_address: &str) -> Self {
        Self::Authenticate {
            wallet_address: Some(wallet_address.to_string()),
        }
    }

    /// Creates a `message` frame.
    #[must_use]
    pub fn message(sender: &str, recipient: &str, content: &str) -> Self {
        Self::Message {
            sender: Some(sender.to_string()),
            recipient: Some(recipient.to_string()),
            content: Some(content.to_string()),
        }
    }

    /// Creates a `mark_read` frame.
    #[must_use]
    pub fn mark_read(message_id: &str, recipient: &str) -> Self {
        Self::MarkRead {
            message_id: Some(message_id.to_string()),
            recipient: Some(recipient.to_string()),
        }
    }

    /// Creates an `ack` frame.
    #[must_use]
    pub fn ack(message_id: &str) -> Self {
        Self::Ack {
            message_id: Some(message_id.to_string()),
        }
    }

    /// Wire tag of this frame, for logging.
    #[must_use]
    pub const fn frame_type(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::Message { .. } => "message",
            Self::MarkRead { .. } => "mark_read",
            Self::Ack { .. } => "ack",
            Self::Ping => "ping",
            Self::Unknown => "unknown",
        }
    }
}

impl ServerFrame {
    /// Decodes a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] if the text is not a server frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Malformed)
    }

    /// Serializes this frame to JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, FrameError> {
        serde_json::to_string(self).map_err(FrameError::Encode)
    }

    /// Creates the `authentication_success` frame.
    #[must_use]
    pub fn authentication_success() -> Self {
        Self::AuthenticationSuccess {
            message: AUTH_SUCCESS_TEXT.to_string(),
        }
    }

    /// Creates a `message` frame carrying a stored message.
    #[must_use]
    pub fn deliver(msg: &ChatMessage) -> Self {
        Self::Message {
            id: Some(msg.id.clone()),
            sender: msg.sender.clone(),
            recipient: msg.recipient.clone(),
            content: msg.content.clone(),
            timestamp: msg.created_at,
            status: Some(msg.status),
        }
    }

    /// Creates the `message_sent` acknowledgement for a stored message.
    #[must_use]
    pub fn message_sent(msg: &ChatMessage) -> Self {
        Self::MessageSent {
            id: Some(msg.id.clone()),
            recipient: msg.recipient.clone(),
            timestamp: msg.created_at,
        }
    }

    /// Creates an `error` frame.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Creates a `pong` frame stamped with `now`.
    #[must_use]
    pub const fn pong(now: DateTime<Utc>) -> Self {
        Self::Pong { timestamp: now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_authenticate_uses_camel_case_field() {
        let frame = ClientFrame::parse(r#"{"type":"authenticate","walletAddress":"alice"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Authenticate {
                wallet_address: Some("alice".to_string())
            }
        );
    }

    #[test]
    fn parse_message_with_missing_fields_is_not_malformed() {
        let frame = ClientFrame::parse(r#"{"type":"message","sender":"alice"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                sender: Some("alice".to_string()),
                recipient: None,
                content: None,
            }
        );
    }

    #[test]
    fn parse_mark_read() {
        let frame =
            ClientFrame::parse(r#"{"type":"mark_read","messageId":"m1","recipient":"bob"}"#).unwrap();
        assert_eq!(frame, ClientFrame::mark_read("m1", "bob"));
    }

    #[test]
    fn parse_unknown_type_decodes_to_unknown() {
        let frame = ClientFrame::parse(r#"{"type":"fetch_pending_messages"}"#).unwrap();
        assert_eq!(frame, ClientFrame::Unknown);
    }

    #[test]
    fn parse_ignores_extra_fields() {
        let frame = ClientFrame::parse(
            r#"{"type":"message","sender":"a","recipient":"b","content":"c","timestamp":"x"}"#,
        )
        .unwrap();
        assert_eq!(frame, ClientFrame::message("a", "b", "c"));
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(
            ClientFrame::parse("not json"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn parse_rejects_missing_type() {
        assert!(matches!(
            ClientFrame::parse(r#"{"sender":"a"}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn parse_rejects_wrong_field_type() {
        assert!(matches!(
            ClientFrame::parse(r#"{"type":"message","sender":42}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn deliver_frame_wire_shape() {
        let msg = ChatMessage::new("alice".into(), "bob".into(), "hi".into(), Utc::now());
        let text = ServerFrame::deliver(&msg).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["sender"], "alice");
        assert_eq!(value["recipient"], "bob");
        assert_eq!(value["content"], "hi");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["id"], msg.id.as_str());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn message_sent_wire_shape() {
        let msg = ChatMessage::new("alice".into(), "bob".into(), "hi".into(), Utc::now());
        let text = ServerFrame::message_sent(&msg).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "message_sent");
        assert_eq!(value["recipient"], "bob");
        assert_eq!(value["id"], msg.id.as_str());
    }

    #[test]
    fn server_message_without_id_parses() {
        let frame = ServerFrame::parse(
            r#"{"type":"message","sender":"a","recipient":"b","content":"c","timestamp":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let ServerFrame::Message { id, status, .. } = frame else {
            panic!("expected message frame");
        };
        assert!(id.is_none());
        assert!(status.is_none());
    }

    #[test]
    fn error_frame_wire_shape() {
        let text = ServerFrame::error(error_text::RECIPIENT_OFFLINE)
            .encode()
            .unwrap();
        assert_eq!(text, r#"{"type":"error","message":"Recipient is not online"}"#);
    }

    #[test]
    fn client_frame_encode_matches_parse() {
        let frame = ClientFrame::ack("m1");
        let text = frame.encode().unwrap();
        assert_eq!(text, r#"{"type":"ack","messageId":"m1"}"#);
    }
}
