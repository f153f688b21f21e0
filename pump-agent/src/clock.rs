//! Time sources for the agent
//!
//! The core never reads the system clock directly. Every operation receives a
//! [`Moment`] carrying both a monotonic offset (used for elapsed-time maths)
//! and a wall-clock timestamp (stamped on outbound reports).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A single reading of both clocks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moment {
    /// Time since the clock's origin. Never goes backwards.
    pub monotonic: Duration,
    pub wall: DateTime<Utc>,
}

pub trait Clock {
    fn now(&self) -> Moment;
}

/// Production clock backed by `tokio::time::Instant`.
///
/// Using tokio's instant means tests running with a paused runtime see
/// virtual time here as well.
#[derive(Debug, Clone)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Moment {
        Moment {
            monotonic: self.origin.elapsed(),
            wall: Utc::now(),
        }
    }
}

/// Hand-driven clock for tests and simulations.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// give another to the agent.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Moment>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(wall: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(Moment {
                monotonic: Duration::ZERO,
                wall,
            })),
        }
    }

    /// Move both clocks forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut current = self.current.lock();
        current.monotonic += step;
        current.wall += chrono::Duration::from_std(step).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Moment {
        *self.current.lock()
    }
}
