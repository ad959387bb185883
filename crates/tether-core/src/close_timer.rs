//! One-shot, cancellable deadline bounding a graceful close

use std::time::Duration;
use tether_util::MonotonicInstant;

/// Armed by a graceful close; polled from the owner loop's tick.
#[derive(Debug, Clone)]
pub struct CloseTimer {
    timeout: Duration,
    deadline: Option<MonotonicInstant>,
}

impl CloseTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn arm(&mut self, now: MonotonicInstant) {
        self.deadline = Some(now + self.timeout);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Returns `true` exactly once when the deadline has passed, disarming the timer.
    pub fn poll_expired(&mut self, now: MonotonicInstant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Time left before expiry, if armed
    pub fn remaining(&self, now: MonotonicInstant) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_until(now))
    }
}
