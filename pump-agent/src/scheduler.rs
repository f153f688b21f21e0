//! Periodic deadlines driven by a monotonic clock
//!
//! The control loop polls often; a [`Periodic`] answers "is it time yet?".
//! After firing, the next deadline is measured from the moment it fired, so a
//! long stall produces one late firing instead of a burst of catch-up ones.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Periodic {
    period: Duration,
    last_fired: Duration,
}

impl Periodic {
    /// First firing happens one `period` after `now`.
    pub fn starting_at(period: Duration, now: Duration) -> Self {
        Self {
            period,
            last_fired: now,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// `true` at most once per period. Consumes the deadline when it fires.
    pub fn poll(&mut self, now: Duration) -> bool {
        if now.saturating_sub(self.last_fired) >= self.period {
            self.last_fired = now;
            true
        } else {
            false
        }
    }

    /// Push the next deadline a full period past `now`.
    pub fn reset(&mut self, now: Duration) {
        self.last_fired = now;
    }
}
