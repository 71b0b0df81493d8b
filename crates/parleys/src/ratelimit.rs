use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Which limit a message would exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Messages per window.
    Messages,
    /// Content bytes per window.
    Bandwidth,
}

impl Limit {
    /// Metric label for this limit.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Messages => "msg_rate",
            Self::Bandwidth => "bw_rate",
        }
    }
}

/// Sliding one-minute window over a connection's `message` frames.
///
/// Each accepted message is remembered with its size until it falls out of
/// the window, so bursts straddling a minute boundary are still counted.
#[derive(Debug)]
pub struct RateLimiter {
    msg_rate: u32,
    bw_rate: u64,
    window: VecDeque<(Instant, u64)>,
    bytes: u64,
}

impl RateLimiter {
    /// Limiter allowing `msg_rate` messages and `bw_rate` bytes per minute.
    #[must_use]
    pub fn new(msg_rate: u32, bw_rate: u64) -> Self {
        Self {
            msg_rate,
            bw_rate,
            window: VecDeque::with_capacity(64),
            bytes: 0,
        }
    }

    fn expire(&mut self, now: Instant) {
        while let Some(&(at, size)) = self.window.front() {
            if now.duration_since(at) < WINDOW {
                break;
            }
            self.bytes = self.bytes.saturating_sub(size);
            self.window.pop_front();
        }
    }

    /// Record a message of `size` bytes at `now` unless it would exceed a
    /// limit. Rejected messages are not recorded.
    pub fn check_at(&mut self, size: usize, now: Instant) -> Result<(), Limit> {
        self.expire(now);
        let size = size as u64;
        if self.window.len() >= self.msg_rate as usize {
            return Err(Limit::Messages);
        }
        if self.bytes.saturating_add(size) > self.bw_rate {
            return Err(Limit::Bandwidth);
        }
        self.window.push_back((now, size));
        self.bytes = self.bytes.saturating_add(size);
        Ok(())
    }

    /// [`check_at`](Self::check_at) with the current instant.
    pub fn check(&mut self, size: usize) -> Result<(), Limit> {
        self.check_at(size, Instant::now())
    }
}
