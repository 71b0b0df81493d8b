use crate::registry::{ConnectionRegistry, Outbound};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tracing::{debug, trace};

/// Periodic keepalive sweep over every registered connection.
///
/// The monitor never mutates the registry. It asks each open connection to
/// ping its peer; a connection whose ping fails, or that has been idle too
/// long, ends its own session and unregisters itself on the way out.
pub struct LivenessMonitor {
    registry: Arc<ConnectionRegistry>,
    period: Duration,
}

impl LivenessMonitor {
    /// Monitor probing every `period`.
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Queue a probe on every open registered connection. Returns how many
    /// connections were probed.
    pub fn probe_all(&self) -> usize {
        let mut probed = 0;
        for id in self.registry.all_identifiers() {
            let Some(handle) = self.registry.lookup(&id) else {
                continue;
            };
            if !handle.is_open() {
                continue;
            }
            match handle.tx.try_send(Outbound::Probe) {
                Ok(()) => probed += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(client = %id, "outbound queue full, skipping probe");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
        probed
    }

    /// Probe on every tick until `shutdown` fires.
    pub async fn run(self, mut shutdown: watch::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let probed = self.probe_all();
                    debug!(probed, "liveness sweep");
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}
