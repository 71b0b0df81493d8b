use crate::metrics::{counters, gauges};
use chrono::{DateTime, Duration, Utc};
use parley_common::{ChatMessage, ClientId, MessageId, MessageStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, warn};

/// How long messages are kept once their expiry clock starts.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Time a message survives after being marked read.
    pub read_retention: Duration,
    /// Time an unread message survives after creation. `None` keeps unread
    /// messages until they are read.
    pub unread_retention: Option<Duration>,
    /// Soft cap on buffered messages per recipient; the oldest is evicted.
    pub max_per_recipient: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            read_retention: Duration::hours(24),
            unread_retention: None,
            max_per_recipient: 10_000,
        }
    }
}

/// Time-bounded buffer of undelivered and unread messages keyed by recipient.
///
/// "Not found" is never an error: every mutating call reports whether it
/// changed anything and callers are free to ignore the answer.
pub trait PendingStore: Send + Sync {
    /// Append a message to its recipient's queue and return the stored copy.
    fn enqueue(&self, message: ChatMessage) -> ChatMessage;

    /// Every unexpired message for `recipient` in insertion order. Messages
    /// stay in the store.
    fn drain(&self, recipient: &ClientId) -> Vec<ChatMessage>;

    /// Pending → Delivered.
    fn mark_delivered(&self, recipient: &ClientId, id: &MessageId, now: DateTime<Utc>) -> bool;

    /// Pending/Delivered → Read and schedule expiry at `now + read_retention`.
    fn mark_read(&self, recipient: &ClientId, id: &MessageId, now: DateTime<Utc>) -> bool;

    /// Remove every message whose expiry is at or before `now`. Returns the
    /// number removed.
    fn sweep_expired(&self, now: DateTime<Utc>) -> usize;

    /// Total number of buffered messages.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is buffered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`PendingStore`] guarded by a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    policy: RetentionPolicy,
    queues: Mutex<HashMap<ClientId, VecDeque<ChatMessage>>>,
}

impl MemoryStore {
    /// Create an empty store with the given retention policy.
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            policy,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<ClientId, VecDeque<ChatMessage>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<F>(&self, recipient: &ClientId, id: &MessageId, f: F) -> bool
    where
        F: FnOnce(&mut ChatMessage) -> bool,
    {
        let mut queues = self.queues();
        queues
            .get_mut(recipient)
            .and_then(|queue| queue.iter_mut().find(|m| &m.id == id))
            .is_some_and(f)
    }
}

impl PendingStore for MemoryStore {
    fn enqueue(&self, mut message: ChatMessage) -> ChatMessage {
        if let Some(ttl) = self.policy.unread_retention {
            message.expires_at = Some(message.created_at + ttl);
        }
        let stored = message.clone();

        let mut queues = self.queues();
        let queue = queues.entry(message.recipient.clone()).or_default();
        queue.push_back(message);
        if queue.len() > self.policy.max_per_recipient {
            if let Some(evicted) = queue.pop_front() {
                counters::messages_dropped_total("evicted");
                warn!(
                    recipient = %evicted.recipient,
                    id = %evicted.id,
                    "pending queue full, evicted oldest message"
                );
            }
        }
        stored
    }

    fn drain(&self, recipient: &ClientId) -> Vec<ChatMessage> {
        let now = Utc::now();
        self.queues()
            .get(recipient)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|m| !m.is_expired_at(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn mark_delivered(&self, recipient: &ClientId, id: &MessageId, _now: DateTime<Utc>) -> bool {
        self.update(recipient, id, |m| m.advance(MessageStatus::Delivered))
    }

    fn mark_read(&self, recipient: &ClientId, id: &MessageId, now: DateTime<Utc>) -> bool {
        let retention = self.policy.read_retention;
        self.update(recipient, id, |m| {
            if m.advance(MessageStatus::Read) {
                m.read_at = Some(now);
                m.expires_at = Some(now + retention);
                true
            } else {
                false
            }
        })
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        let mut queues = self.queues();
        queues.retain(|_, queue| {
            queue.retain_mut(|m| {
                if m.is_expired_at(now) {
                    m.advance(MessageStatus::Expired);
                    removed += 1;
                    false
                } else {
                    true
                }
            });
            !queue.is_empty()
        });
        removed
    }

    fn len(&self) -> usize {
        self.queues().values().map(VecDeque::len).sum()
    }
}

/// Periodically sweep expired messages until `shutdown` fires.
pub async fn run_sweeper(
    store: Arc<dyn PendingStore>,
    period: std::time::Duration,
    mut shutdown: watch::Receiver<()>,
) {
    let mut ticker = interval(period);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = store.sweep_expired(Utc::now());
                if removed > 0 {
                    debug!(removed, "swept expired messages");
                    counters::messages_expired_total(removed as u64);
                }
                gauges::set_pending_messages(store.len());
            }
            _ = shutdown.changed() => break,
        }
    }
}
