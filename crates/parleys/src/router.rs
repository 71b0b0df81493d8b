use crate::error::RouteError;
use crate::metrics::counters;
use crate::registry::{ConnectionRegistry, Outbound};
use crate::store::PendingStore;
use chrono::{DateTime, Utc};
use parley_common::frame::error_text;
use parley_common::{ChatMessage, ClientId, ServerFrame};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// What happened to a routed message. The message is buffered in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Pushed to the recipient's live connection.
    Pushed(ChatMessage),
    /// Recipient is online but its outbound queue is full. Live delivery is
    /// skipped for this message: the recipient sees it only in the backlog
    /// sent after its next `authenticate`. Counted under
    /// `parley_messages_routed_total{outcome="deferred"}`.
    Deferred(ChatMessage),
    /// Recipient is not connected.
    Buffered(ChatMessage),
}

impl RouteOutcome {
    /// The stored message.
    #[must_use]
    pub const fn message(&self) -> &ChatMessage {
        match self {
            Self::Pushed(m) | Self::Deferred(m) | Self::Buffered(m) => m,
        }
    }

    /// Frames to send back to the sender, in order.
    #[must_use]
    pub fn sender_replies(&self) -> Vec<ServerFrame> {
        let sent = ServerFrame::message_sent(self.message());
        match self {
            Self::Pushed(_) | Self::Deferred(_) => vec![sent],
            Self::Buffered(_) => vec![sent, ServerFrame::error(error_text::RECIPIENT_OFFLINE)],
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Pushed(_) => "pushed",
            Self::Deferred(_) => "deferred",
            Self::Buffered(_) => "buffered",
        }
    }
}

/// Single entry point for "a client wants to send content to another client".
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn PendingStore>,
    max_content: usize,
}

impl MessageRouter {
    /// Create a router over the shared registry and store.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn PendingStore>,
        max_content: usize,
    ) -> Self {
        Self {
            registry,
            store,
            max_content,
        }
    }

    /// Validate, buffer, and push a message if its recipient is reachable.
    ///
    /// `authenticated` is the identity of the sending session; a frame that
    /// claims a different sender is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] if the message is missing a field, claims a
    /// foreign sender, or exceeds the content limit. Nothing is stored then.
    pub fn route(
        &self,
        authenticated: &ClientId,
        sender: Option<&str>,
        recipient: Option<&str>,
        content: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RouteOutcome, RouteError> {
        let sender = required("sender", sender)?;
        let recipient = required("recipient", recipient)?;
        let content = required("content", content)?;
        if sender != authenticated.as_str() {
            return Err(RouteError::SenderMismatch);
        }
        if content.len() > self.max_content {
            return Err(RouteError::TooLarge {
                max: self.max_content,
                actual: content.len(),
            });
        }

        let message = ChatMessage::new(
            authenticated.clone(),
            ClientId::from(recipient),
            content.to_string(),
            now,
        );
        let stored = self.store.enqueue(message);

        let outcome = match self.registry.lookup(&stored.recipient) {
            Some(handle) if handle.is_open() => {
                let text = ServerFrame::deliver(&stored).encode()?;
                match handle.tx.try_send(Outbound::Frame(text)) {
                    Ok(()) => RouteOutcome::Pushed(stored),
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            recipient = %stored.recipient,
                            id = %stored.id,
                            "recipient queue full, live delivery skipped"
                        );
                        RouteOutcome::Deferred(stored)
                    }
                    Err(TrySendError::Closed(_)) => {
                        self.registry.unregister(&stored.recipient, handle.conn_id);
                        RouteOutcome::Buffered(stored)
                    }
                }
            }
            _ => RouteOutcome::Buffered(stored),
        };

        counters::messages_routed_total(outcome.label());
        debug!(
            sender = %outcome.message().sender,
            recipient = %outcome.message().recipient,
            id = %outcome.message().id,
            outcome = outcome.label(),
            "routed message"
        );
        Ok(outcome)
    }
}

fn required<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, RouteError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RouteError::MissingField(field)),
    }
}
