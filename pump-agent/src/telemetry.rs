//! Telemetry scheduler
//!
//! Every cycle:
//! - advances the delivered volume from active pumping time and flow rate
//! - stops the pump once the target volume is reached (no telemetry that cycle)
//! - otherwise publishes telemetry with fresh sensor reads, plus a progress
//!   record while an infusion is running

use crate::clock::Moment;
use crate::commands::{StopRequest, AUTO_COMPLETE};
use crate::hardware::{HardwareActuator, SensorReadings};
use crate::processor::CommandProcessor;
use crate::reports::{ErrorReport, ProgressReport, Report, Severity, TelemetryReport, SENSOR_FAULT};
use crate::scheduler::Periodic;
use crate::state::PumpState;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct TelemetryScheduler {
    cadence: Periodic,
}

impl TelemetryScheduler {
    pub fn new(every: Duration, now: Duration) -> Self {
        Self {
            cadence: Periodic::starting_at(every, now),
        }
    }

    /// Run a cycle if the cadence is due.
    pub fn poll<H: HardwareActuator + ?Sized>(
        &mut self,
        state: &mut PumpState,
        hardware: &mut H,
        processor: &CommandProcessor,
        now: Moment,
    ) -> Vec<Report> {
        if !self.cadence.poll(now.monotonic) {
            return Vec::new();
        }
        self.run_cycle(state, hardware, processor, now)
    }

    pub fn run_cycle<H: HardwareActuator + ?Sized>(
        &self,
        state: &mut PumpState,
        hardware: &mut H,
        processor: &CommandProcessor,
        now: Moment,
    ) -> Vec<Report> {
        if state.is_delivering() {
            let elapsed_min = state.active_elapsed(now.monotonic).as_secs_f64() / 60.0;
            state.record_volume(state.flow_rate() * elapsed_min);

            if state.current_volume() >= state.target_volume() {
                info!(
                    "Target volume {} reached ({:.2} delivered), completing infusion",
                    state.target_volume(),
                    state.current_volume()
                );
                return processor.stop(state, hardware, AUTO_COMPLETE, &StopRequest::auto_complete(), now);
            }
        }

        let (readings, faults) = SensorReadings::collect(hardware);
        let mut reports: Vec<Report> = faults
            .into_iter()
            .map(|fault| {
                warn!("Telemetry sensor read failed: {}", fault);
                Report::Error(ErrorReport::new(SENSOR_FAULT, fault.to_string(), Severity::Medium, now.wall))
            })
            .collect();

        let progress_pct = state.progress_pct();
        debug!(
            "Telemetry: {:.2}/{} ({:.1}%)",
            state.current_volume(),
            state.target_volume(),
            progress_pct
        );
        reports.push(Report::Telemetry(TelemetryReport {
            flow_rate: state.flow_rate(),
            current_volume: state.current_volume(),
            target_volume: state.target_volume(),
            progress_pct,
            running: state.is_running(),
            paused: state.is_paused(),
            medication: state.medication().to_string(),
            priority: state.priority(),
            pressure: readings.pressure,
            temperature: readings.temperature,
            battery_pct: readings.battery_pct,
            timestamp: now.wall,
        }));

        if state.is_running() {
            if let Some(time_remaining_min) = state.time_remaining_min() {
                reports.push(Report::Progress(ProgressReport {
                    time_remaining_min,
                    volume_remaining: state.volume_remaining(),
                    progress_pct,
                    timestamp: now.wall,
                }));
            }
        }

        reports
    }
}
