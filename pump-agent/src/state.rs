//! Pump state - the single source of truth for the pump's operational state
//!
//! Fields are private. Transitions are crate-internal and each one keeps the
//! `paused => running` invariant, so no caller can observe a half-applied
//! transition or a paused pump that is not running.

use crate::commands::InfusionPlan;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Clinical priority attached to an infusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Urgent,
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        f.write_str(name)
    }
}

/// Coarse device status published on the status topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpStatus {
    /// Liveness announcement right after a (re)connection.
    Healthy,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PumpState {
    running: bool,
    paused: bool,
    flow_rate: f64,
    duration_min: u32,
    target_volume: f64,
    current_volume: f64,
    start_time: Duration,
    paused_since: Option<Duration>,
    paused_total: Duration,
    medication: String,
    priority: Priority,
}

impl PumpState {
    /// Stopped pump with every field zeroed.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Running and not paused: the only state in which volume is delivered.
    pub fn is_delivering(&self) -> bool {
        self.running && !self.paused
    }

    pub fn flow_rate(&self) -> f64 {
        self.flow_rate
    }

    pub fn duration_min(&self) -> u32 {
        self.duration_min
    }

    pub fn target_volume(&self) -> f64 {
        self.target_volume
    }

    pub fn current_volume(&self) -> f64 {
        self.current_volume
    }

    pub fn start_time(&self) -> Duration {
        self.start_time
    }

    pub fn medication(&self) -> &str {
        &self.medication
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn status(&self) -> PumpStatus {
        match (self.running, self.paused) {
            (false, _) => PumpStatus::Stopped,
            (true, true) => PumpStatus::Paused,
            (true, false) => PumpStatus::Running,
        }
    }

    pub fn can_pause(&self) -> bool {
        self.running && !self.paused
    }

    pub fn can_resume(&self) -> bool {
        self.running && self.paused
    }

    /// Pumping time since start, excluding every paused interval.
    pub fn active_elapsed(&self, now: Duration) -> Duration {
        if !self.running {
            return Duration::ZERO;
        }
        let open_pause = self
            .paused_since
            .map(|since| now.saturating_sub(since))
            .unwrap_or_default();
        now.saturating_sub(self.start_time)
            .saturating_sub(self.paused_total + open_pause)
    }

    /// Percentage of the target delivered, in `0.0..=100.0`.
    ///
    /// A zero target yields 0 whatever the current volume.
    pub fn progress_pct(&self) -> f64 {
        if self.target_volume <= 0.0 {
            return 0.0;
        }
        (self.current_volume / self.target_volume * 100.0).clamp(0.0, 100.0)
    }

    pub fn volume_remaining(&self) -> f64 {
        (self.target_volume - self.current_volume).max(0.0)
    }

    /// Minutes left at the current flow rate, `None` when the rate is zero.
    pub fn time_remaining_min(&self) -> Option<f64> {
        (self.flow_rate > 0.0).then(|| self.volume_remaining() / self.flow_rate)
    }

    pub(crate) fn begin(&mut self, plan: &InfusionPlan, now: Duration) {
        self.running = true;
        self.paused = false;
        self.flow_rate = plan.flow_rate;
        self.duration_min = plan.duration_min;
        self.target_volume = plan.target_volume;
        self.current_volume = 0.0;
        self.start_time = now;
        self.paused_since = None;
        self.paused_total = Duration::ZERO;
        self.medication = plan.medication.clone();
        self.priority = plan.priority;
    }

    pub(crate) fn halt(&mut self, now: Duration) {
        self.close_pause(now);
        self.running = false;
        self.paused = false;
    }

    /// Returns `false` (and changes nothing) unless running and not paused.
    pub(crate) fn suspend(&mut self, now: Duration) -> bool {
        if !self.can_pause() {
            return false;
        }
        self.paused = true;
        self.paused_since = Some(now);
        true
    }

    /// Returns `false` (and changes nothing) unless running and paused.
    pub(crate) fn unsuspend(&mut self, now: Duration) -> bool {
        if !self.can_resume() {
            return false;
        }
        self.close_pause(now);
        self.paused = false;
        true
    }

    /// Current volume only ever grows between two starts.
    pub(crate) fn record_volume(&mut self, volume: f64) {
        if volume.is_finite() && volume > self.current_volume {
            self.current_volume = volume;
        }
    }

    fn close_pause(&mut self, now: Duration) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += now.saturating_sub(since);
        }
    }
}
