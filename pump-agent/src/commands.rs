//! Inbound commands
//!
//! The wire envelope (`{command, commandId, payload}`) is decoded once, then
//! turned into a closed [`CommandAction`] with a validated payload. Anything
//! that fails validation never reaches the processor as a command: it becomes
//! an [`InvalidCommand`] that the processor answers with a rejection.

use crate::state::Priority;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Correlation token used for the stop synthesised on completion.
pub const AUTO_COMPLETE: &str = "auto_complete";

/// Command names on the wire are mapped only through `wire_name`/`from_wire`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Start,
    Stop,
    Pause,
    Resume,
}

impl CommandKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            CommandKind::Start => "START_INFUSION",
            CommandKind::Stop => "STOP_INFUSION",
            CommandKind::Pause => "PAUSE_INFUSION",
            CommandKind::Resume => "RESUME_INFUSION",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "START_INFUSION" => Some(CommandKind::Start),
            "STOP_INFUSION" => Some(CommandKind::Stop),
            "PAUSE_INFUSION" => Some(CommandKind::Pause),
            "RESUME_INFUSION" => Some(CommandKind::Resume),
            _ => None,
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Validated parameters of a START_INFUSION command.
#[derive(Debug, Clone, PartialEq)]
pub struct InfusionPlan {
    /// Volume per minute, strictly positive.
    pub flow_rate: f64,
    pub duration_min: u32,
    /// Strictly positive.
    pub target_volume: f64,
    pub medication: String,
    pub priority: Priority,
}

/// Parameters of a STOP_INFUSION command. Both are audit-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StopRequest {
    pub reason: Option<String>,
    pub emergency: bool,
}

impl StopRequest {
    pub fn auto_complete() -> Self {
        Self {
            reason: Some(AUTO_COMPLETE.to_string()),
            emergency: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandAction {
    Start(InfusionPlan),
    Stop(StopRequest),
    Pause,
    Resume,
}

impl CommandAction {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandAction::Start(_) => CommandKind::Start,
            CommandAction::Stop(_) => CommandKind::Stop,
            CommandAction::Pause => CommandKind::Pause,
            CommandAction::Resume => CommandKind::Resume,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub command_id: String,
    pub action: CommandAction,
}

impl Command {
    pub fn new(command_id: impl Into<String>, action: CommandAction) -> Self {
        Self {
            command_id: command_id.into(),
            action,
        }
    }

    pub fn kind(&self) -> CommandKind {
        self.action.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
    #[error("unknown priority `{0}` (expected normal, high or urgent)")]
    UnknownPriority(String),
}

/// A well-formed envelope whose command could not be accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidCommand {
    pub command_id: String,
    /// Command name exactly as received.
    pub command: String,
    pub error: ValidationError,
}

/// Inbound envelope as published on `devices/{id}/commands`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    pub command: String,
    pub command_id: String,
    #[serde(default)]
    pub payload: Value,
}

impl CommandEnvelope {
    /// Validate the envelope into a typed command.
    pub fn into_command(self) -> Result<Command, InvalidCommand> {
        match parse_action(&self.command, &self.payload) {
            Ok(action) => Ok(Command::new(self.command_id, action)),
            Err(error) => Err(InvalidCommand {
                command_id: self.command_id,
                command: self.command,
                error,
            }),
        }
    }
}

fn parse_action(command: &str, payload: &Value) -> Result<CommandAction, ValidationError> {
    let kind = CommandKind::from_wire(command)
        .ok_or_else(|| ValidationError::UnknownCommand(command.to_string()))?;

    let empty = Map::new();
    let fields = match payload {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(ValidationError::InvalidField {
                field: "payload",
                expected: "an object",
            })
        }
    };

    match kind {
        CommandKind::Start => parse_plan(fields).map(CommandAction::Start),
        CommandKind::Stop => parse_stop(fields).map(CommandAction::Stop),
        CommandKind::Pause => Ok(CommandAction::Pause),
        CommandKind::Resume => Ok(CommandAction::Resume),
    }
}

fn parse_plan(fields: &Map<String, Value>) -> Result<InfusionPlan, ValidationError> {
    let flow_rate = positive_number(fields, &["flowRate"], "flowRate")?;
    let duration_min = whole_minutes(fields, "duration")?;
    let target_volume = positive_number(fields, &["volume", "targetVolume"], "volume")?;

    let medication = match present(fields, &["medication"]) {
        None => return Err(ValidationError::MissingField("medication")),
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "medication",
                expected: "a non-empty string",
            })
        }
    };

    let priority = match present(fields, &["priority"]) {
        None => Priority::default(),
        Some(Value::String(raw)) => raw
            .parse()
            .map_err(ValidationError::UnknownPriority)?,
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "priority",
                expected: "a string",
            })
        }
    };

    Ok(InfusionPlan {
        flow_rate,
        duration_min,
        target_volume,
        medication,
        priority,
    })
}

fn parse_stop(fields: &Map<String, Value>) -> Result<StopRequest, ValidationError> {
    let reason = match present(fields, &["reason"]) {
        None => None,
        Some(Value::String(reason)) => Some(reason.clone()),
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "reason",
                expected: "a string",
            })
        }
    };

    let emergency = match present(fields, &["emergency"]) {
        None => false,
        Some(Value::Bool(flag)) => *flag,
        Some(_) => {
            return Err(ValidationError::InvalidField {
                field: "emergency",
                expected: "a boolean",
            })
        }
    };

    Ok(StopRequest { reason, emergency })
}

/// First non-null value among `keys`.
fn present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

fn positive_number(
    fields: &Map<String, Value>,
    keys: &[&str],
    field: &'static str,
) -> Result<f64, ValidationError> {
    let value = present(fields, keys).ok_or(ValidationError::MissingField(field))?;
    match value.as_f64() {
        Some(number) if number.is_finite() && number > 0.0 => Ok(number),
        _ => Err(ValidationError::InvalidField {
            field,
            expected: "a number greater than zero",
        }),
    }
}

fn whole_minutes(fields: &Map<String, Value>, field: &'static str) -> Result<u32, ValidationError> {
    let value = present(fields, &[field]).ok_or(ValidationError::MissingField(field))?;
    let invalid = ValidationError::InvalidField {
        field,
        expected: "a non-negative whole number",
    };

    if let Some(whole) = value.as_u64() {
        return u32::try_from(whole).map_err(|_| invalid);
    }
    match value.as_f64() {
        Some(number) if number >= 0.0 && number.fract() == 0.0 && number <= f64::from(u32::MAX) => {
            Ok(number as u32)
        }
        _ => Err(invalid),
    }
}
