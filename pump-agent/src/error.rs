//! Error types shared across the agent's boundaries
//!
//! Domain errors live next to their domain (`ValidationError` in
//! [`crate::commands`], `HardwareError` in [`crate::hardware`]). The ones here
//! belong to the collaborators around the core: transport, wire decoding and
//! configuration. None of them is fatal once the agent is running.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("gateway is offline")]
    Offline,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed command envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("command envelope has an empty commandId")]
    EmptyCommandId,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("`{field}` must not contain MQTT topic separators or wildcards: {value}")]
    TopicReserved { field: &'static str, value: String },
}
