//! Outbound records
//!
//! Plain data: nothing here is stored, each record is built, published once
//! and dropped. Field names follow the JSON contracts the backend already
//! consumes (`isRunning`, `batteryLevel`, `errorCode`, ...). The device id is
//! added by the codec, not carried by the records.

use crate::commands::CommandKind;
use crate::state::{Priority, PumpStatus};
use crate::topics::Channel;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const HARDWARE_FAULT: &str = "HARDWARE_FAULT";
pub const SENSOR_FAULT: &str = "SENSOR_FAULT";
pub const MALFORMED_COMMAND: &str = "MALFORMED_COMMAND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResponse {
    pub command_id: String,
    /// Wire name of the command, echoed verbatim for unknown commands.
    pub command: String,
    pub status: Outcome,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl CommandResponse {
    pub fn success(
        command_id: impl Into<String>,
        kind: CommandKind,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            command: kind.wire_name().to_string(),
            status: Outcome::Success,
            message: message.into(),
            timestamp,
        }
    }

    pub fn rejected(
        command_id: impl Into<String>,
        command: impl Into<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            command: command.into(),
            status: Outcome::Rejected,
            message: message.into(),
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: PumpStatus,
    #[serde(rename = "isRunning")]
    pub running: bool,
    #[serde(rename = "isPaused")]
    pub paused: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReport {
    pub flow_rate: f64,
    pub current_volume: f64,
    pub target_volume: f64,
    #[serde(rename = "progress")]
    pub progress_pct: f64,
    #[serde(rename = "isRunning")]
    pub running: bool,
    #[serde(rename = "isPaused")]
    pub paused: bool,
    pub medication: String,
    pub priority: Priority,
    /// `None` when the sensor could not be read this cycle.
    pub pressure: Option<f64>,
    pub temperature: Option<f64>,
    #[serde(rename = "batteryLevel")]
    pub battery_pct: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub time_remaining_min: f64,
    #[serde(rename = "volumeRemainingMl")]
    pub volume_remaining: f64,
    #[serde(rename = "progress")]
    pub progress_pct: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    #[serde(rename = "errorCode")]
    pub code: String,
    #[serde(rename = "errorMessage")]
    pub message: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            timestamp,
        }
    }
}

/// Any record the agent publishes.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Response(CommandResponse),
    Status(StatusReport),
    Telemetry(TelemetryReport),
    Progress(ProgressReport),
    Error(ErrorReport),
}

impl Report {
    /// Outbound channel this record is published on.
    pub fn channel(&self) -> Channel {
        match self {
            Report::Response(_) => Channel::Response,
            Report::Status(_) => Channel::Status,
            Report::Telemetry(_) => Channel::Telemetry,
            Report::Progress(_) => Channel::Progress,
            Report::Error(_) => Channel::Error,
        }
    }

    pub fn as_response(&self) -> Option<&CommandResponse> {
        match self {
            Report::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn as_status(&self) -> Option<&StatusReport> {
        match self {
            Report::Status(status) => Some(status),
            _ => None,
        }
    }

    pub fn as_telemetry(&self) -> Option<&TelemetryReport> {
        match self {
            Report::Telemetry(telemetry) => Some(telemetry),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorReport> {
        match self {
            Report::Error(error) => Some(error),
            _ => None,
        }
    }
}
