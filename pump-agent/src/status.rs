//! Status reporter: heartbeat and transition announcements

use crate::clock::Moment;
use crate::reports::{Report, StatusReport};
use crate::scheduler::Periodic;
use crate::state::{PumpState, PumpStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::debug;

pub struct StatusReporter {
    heartbeat: Periodic,
}

impl StatusReporter {
    pub fn new(heartbeat_every: Duration, now: Duration) -> Self {
        Self {
            heartbeat: Periodic::starting_at(heartbeat_every, now),
        }
    }

    /// Status derived from the pump flags.
    pub fn snapshot(state: &PumpState, at: DateTime<Utc>) -> StatusReport {
        StatusReport {
            status: state.status(),
            running: state.is_running(),
            paused: state.is_paused(),
            timestamp: at,
        }
    }

    /// Liveness announcement sent right after a (re)connection.
    ///
    /// Always `healthy`, whatever the pump is doing; the flags still carry
    /// the real state. Restarts the heartbeat period.
    pub fn on_connected(&mut self, state: &PumpState, now: Moment) -> Report {
        self.heartbeat.reset(now.monotonic);
        Report::Status(StatusReport {
            status: PumpStatus::Healthy,
            ..Self::snapshot(state, now.wall)
        })
    }

    /// Heartbeat, if one is due.
    pub fn poll(&mut self, state: &PumpState, now: Moment) -> Option<Report> {
        if !self.heartbeat.poll(now.monotonic) {
            return None;
        }
        debug!("Heartbeat: {:?}", state.status());
        Some(Report::Status(Self::snapshot(state, now.wall)))
    }
}
