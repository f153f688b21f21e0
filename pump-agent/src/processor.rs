//! Command processor - the only writer of pump state transitions
//!
//! Each command is handled to completion before the next one:
//! 1. Check preconditions against the current state
//! 2. Drive the actuator
//! 3. Commit the transition only if the actuator succeeded
//! 4. Return the response and status records to publish
//!
//! An actuator failure leaves the state untouched and yields a rejected
//! response followed by a high-severity error report.

use crate::clock::Moment;
use crate::commands::{Command, CommandAction, CommandKind, InfusionPlan, InvalidCommand, StopRequest};
use crate::hardware::{HardwareActuator, HardwareError};
use crate::reports::{CommandResponse, ErrorReport, Report, Severity, HARDWARE_FAULT};
use crate::state::PumpState;
use crate::status::StatusReporter;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct ProcessorOptions {
    /// Answer PAUSE/RESUME with a rejection when their precondition does
    /// not hold, instead of ignoring them.
    pub reject_ignored_commands: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommandProcessor {
    options: ProcessorOptions,
}

impl CommandProcessor {
    pub fn new(options: ProcessorOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    /// Apply one validated command.
    pub fn process<H: HardwareActuator + ?Sized>(
        &self,
        state: &mut PumpState,
        hardware: &mut H,
        command: Command,
        now: Moment,
    ) -> Vec<Report> {
        info!("Processing {} ({})", command.kind(), command.command_id);
        match command.action {
            CommandAction::Start(plan) => self.start(state, hardware, &command.command_id, &plan, now),
            CommandAction::Stop(request) => self.stop(state, hardware, &command.command_id, &request, now),
            CommandAction::Pause => self.pause(state, hardware, &command.command_id, now),
            CommandAction::Resume => self.resume(state, hardware, &command.command_id, now),
        }
    }

    /// Answer a command that failed validation. State and hardware are not touched.
    pub fn reject(&self, invalid: &InvalidCommand, now: Moment) -> Vec<Report> {
        warn!(
            "Rejecting {} ({}): {}",
            invalid.command, invalid.command_id, invalid.error
        );
        vec![Report::Response(CommandResponse::rejected(
            invalid.command_id.clone(),
            invalid.command.clone(),
            invalid.error.to_string(),
            now.wall,
        ))]
    }

    fn start<H: HardwareActuator + ?Sized>(
        &self,
        state: &mut PumpState,
        hardware: &mut H,
        command_id: &str,
        plan: &InfusionPlan,
        now: Moment,
    ) -> Vec<Report> {
        if state.is_running() {
            warn!(
                "Start received while an infusion of {} is in progress, restarting",
                state.medication()
            );
        }
        if let Err(e) = hardware.start(plan) {
            return hardware_fault(command_id, CommandKind::Start, &e, now);
        }

        state.begin(plan, now.monotonic);
        info!(
            "Infusion started: {} at {} per min, target {} ({} priority)",
            plan.medication, plan.flow_rate, plan.target_volume, plan.priority
        );
        self.transitioned(state, command_id, CommandKind::Start, "Infusion started", now)
    }

    /// Stop always succeeds unless the actuator fails, even when already stopped.
    pub(crate) fn stop<H: HardwareActuator + ?Sized>(
        &self,
        state: &mut PumpState,
        hardware: &mut H,
        command_id: &str,
        request: &StopRequest,
        now: Moment,
    ) -> Vec<Report> {
        let reason = request.reason.as_deref().unwrap_or("unspecified");
        if request.emergency {
            error!("EMERGENCY stop requested ({}), reason: {}", command_id, reason);
        }

        if let Err(e) = hardware.stop() {
            return hardware_fault(command_id, CommandKind::Stop, &e, now);
        }

        state.halt(now.monotonic);
        info!(
            "Infusion stopped - reason: {}, delivered {:.2}",
            reason,
            state.current_volume()
        );
        let message = match (&request.reason, request.emergency) {
            (Some(reason), true) => format!("Emergency stop: {reason}"),
            (None, true) => "Emergency stop".to_string(),
            (Some(reason), false) => format!("Infusion stopped: {reason}"),
            (None, false) => "Infusion stopped".to_string(),
        };
        self.transitioned(state, command_id, CommandKind::Stop, message, now)
    }

    fn pause<H: HardwareActuator + ?Sized>(
        &self,
        state: &mut PumpState,
        hardware: &mut H,
        command_id: &str,
        now: Moment,
    ) -> Vec<Report> {
        if !state.can_pause() {
            return self.ignored(command_id, CommandKind::Pause, "Infusion is not running", now);
        }
        if let Err(e) = hardware.pause() {
            return hardware_fault(command_id, CommandKind::Pause, &e, now);
        }

        state.suspend(now.monotonic);
        info!("Infusion paused");
        self.transitioned(state, command_id, CommandKind::Pause, "Infusion paused", now)
    }

    fn resume<H: HardwareActuator + ?Sized>(
        &self,
        state: &mut PumpState,
        hardware: &mut H,
        command_id: &str,
        now: Moment,
    ) -> Vec<Report> {
        if !state.can_resume() {
            return self.ignored(command_id, CommandKind::Resume, "Infusion is not paused", now);
        }
        if let Err(e) = hardware.resume() {
            return hardware_fault(command_id, CommandKind::Resume, &e, now);
        }

        state.unsuspend(now.monotonic);
        info!("Infusion resumed");
        self.transitioned(state, command_id, CommandKind::Resume, "Infusion resumed", now)
    }

    fn transitioned(
        &self,
        state: &PumpState,
        command_id: &str,
        kind: CommandKind,
        message: impl Into<String>,
        now: Moment,
    ) -> Vec<Report> {
        vec![
            Report::Response(CommandResponse::success(command_id, kind, message, now.wall)),
            Report::Status(StatusReporter::snapshot(state, now.wall)),
        ]
    }

    fn ignored(&self, command_id: &str, kind: CommandKind, why: &str, now: Moment) -> Vec<Report> {
        warn!("Ignoring {} ({}): {}", kind, command_id, why);
        if !self.options.reject_ignored_commands {
            return Vec::new();
        }
        vec![Report::Response(CommandResponse::rejected(
            command_id,
            kind.wire_name(),
            why,
            now.wall,
        ))]
    }
}

fn hardware_fault(command_id: &str, kind: CommandKind, fault: &HardwareError, now: Moment) -> Vec<Report> {
    error!("{} ({}) aborted, state unchanged: {}", kind, command_id, fault);
    vec![
        Report::Response(CommandResponse::rejected(
            command_id,
            kind.wire_name(),
            format!("Hardware fault: {fault}"),
            now.wall,
        )),
        Report::Error(ErrorReport::new(
            HARDWARE_FAULT,
            format!("{kind} failed: {fault}"),
            Severity::High,
            now.wall,
        )),
    ]
}
