use rand::Rng;
use std::time::Duration;

/// Exponential backoff with randomized jitter.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    factor: f64,
    current: Duration,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` with the given parameters.
    ///
    /// # Examples
    ///
    /// ```
    /// use parleyc::backoff::ExponentialBackoff;
    /// use std::time::Duration;
    /// let mut backoff = ExponentialBackoff::new(
    ///     Duration::from_millis(100),
    ///     Duration::from_millis(5000),
    ///     2.0,
    /// );
    /// let delay = backoff.next_delay();
    /// assert!(delay >= Duration::from_millis(75)); // 100ms * 0.75 jitter
    /// assert!(delay <= Duration::from_millis(125)); // 100ms * 1.25 jitter
    /// ```
    #[must_use]
    pub const fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            current: initial,
        }
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    /// Compute the next delay (with jitter) and advance the internal state.
    pub fn next_delay(&mut self) -> Duration {
        let current_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;

        // Apply jitter to the current delay before advancing
        let jitter_factor = rand::thread_rng().gen_range(0.75..=1.25);
        let jittered_ms = (current_ms as f64 * jitter_factor) as u64;
        let delay = Duration::from_millis(jittered_ms);

        // Advance state for next call
        let next_ms = (current_ms as f64 * self.factor) as u64;
        let next = Duration::from_millis(next_ms.min(self.max.as_millis() as u64));
        self.current = next.min(self.max);

        delay
    }

    /// Reset the backoff to its initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Where the client's relay link stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// No link, and no attempt scheduled.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Authenticated with the relay.
    Connected,
    /// Waiting before the next attempt.
    Backoff(Duration),
}

/// Reconnect policy: `Disconnected → Connecting → Connected`, with failures
/// passing through `Backoff` until `max_attempts` consecutive failures leave
/// the link `Disconnected` for good.
#[derive(Debug)]
pub struct Reconnector {
    backoff: ExponentialBackoff,
    max_attempts: u32,
    failures: u32,
    state: ReconnectState,
}

impl Reconnector {
    /// Reconnector giving up after `max_attempts` consecutive failures.
    #[must_use]
    pub const fn new(backoff: ExponentialBackoff, max_attempts: u32) -> Self {
        Self {
            backoff,
            max_attempts,
            failures: 0,
            state: ReconnectState::Disconnected,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ReconnectState {
        self.state
    }

    /// Consecutive failures since the last successful connection.
    #[must_use]
    pub const fn failures(&self) -> u32 {
        self.failures
    }

    /// `true` once the attempt budget is spent.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.failures >= self.max_attempts
    }

    /// An attempt is starting.
    pub fn connecting(&mut self) {
        self.state = ReconnectState::Connecting;
    }

    /// The attempt succeeded. Clears the failure count and the backoff.
    pub fn connected(&mut self) {
        self.failures = 0;
        self.backoff.reset();
        self.state = ReconnectState::Connected;
    }

    /// An attempt failed or an established link dropped. Returns the delay
    /// before the next attempt, or `None` when the budget is spent.
    pub fn failed(&mut self) -> Option<Duration> {
        self.failures = self.failures.saturating_add(1);
        if self.is_exhausted() {
            self.state = ReconnectState::Disconnected;
            return None;
        }
        let delay = self.backoff.next_delay();
        self.state = ReconnectState::Backoff(delay);
        Some(delay)
    }

    /// The link was closed on purpose.
    pub fn stop(&mut self) {
        self.state = ReconnectState::Disconnected;
    }
}
