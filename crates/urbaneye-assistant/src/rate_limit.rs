//! Sliding-window rate limiter for outbound assistant messages.
//!
//! Tracks the send times admitted within the trailing window. Stale entries
//! are pruned lazily whenever the window is queried; there is no timer.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default number of messages admitted per window.
pub const DEFAULT_MAX: usize = 20;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(60_000);

/// Admission control over message sends.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Maximum sends admitted within one window.
    max: usize,
    /// Length of the trailing window.
    window: Duration,
    /// Admitted send times, oldest first.
    timestamps: VecDeque<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// Create a limiter admitting `max` sends per `window`.
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            timestamps: VecDeque::with_capacity(max),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Whether another send may be admitted now.
    pub fn can_send(&mut self) -> bool {
        self.can_send_at(Instant::now())
    }

    /// Record an admitted send now.
    ///
    /// Call only after `can_send` returned true for the same operation, and
    /// before issuing the network request.
    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    /// Sends still available in the current window. For display only;
    /// admission always goes through `can_send`.
    pub fn remaining(&mut self) -> usize {
        self.remaining_at(Instant::now())
    }

    /// Time until the oldest tracked send leaves the window.
    pub fn retry_after(&mut self) -> Duration {
        self.retry_after_at(Instant::now())
    }

    pub fn can_send_at(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.timestamps.len() < self.max
    }

    pub fn record_at(&mut self, now: Instant) {
        self.timestamps.push_back(now);
        tracing::debug!(
            in_window = self.timestamps.len(),
            max = self.max,
            "Assistant send recorded"
        );
    }

    pub fn remaining_at(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.max.saturating_sub(self.timestamps.len())
    }

    pub fn retry_after_at(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.timestamps.len() < self.max {
            return Duration::ZERO;
        }
        self.timestamps
            .front()
            .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
            .unwrap_or(Duration::ZERO)
    }

    /// Drop timestamps that are no longer strictly inside the window.
    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) < self.window {
                break;
            }
            self.timestamps.pop_front();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
