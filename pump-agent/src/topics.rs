//! Per-device topic set: `devices/{id}/{channel}`

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Inbound.
    Commands,
    Status,
    Telemetry,
    Progress,
    Error,
    Response,
}

impl Channel {
    pub const OUTBOUND: [Channel; 5] = [
        Channel::Status,
        Channel::Telemetry,
        Channel::Progress,
        Channel::Error,
        Channel::Response,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            Channel::Commands => "commands",
            Channel::Status => "status",
            Channel::Telemetry => "telemetry",
            Channel::Progress => "progress",
            Channel::Error => "error",
            Channel::Response => "response",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// Topic names for one device, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTopics {
    device_id: String,
    commands: String,
    status: String,
    telemetry: String,
    progress: String,
    error: String,
    response: String,
}

impl DeviceTopics {
    pub fn new(device_id: impl Into<String>) -> Self {
        let device_id = device_id.into();
        let topic = |channel: Channel| format!("devices/{}/{}", device_id, channel.suffix());
        Self {
            commands: topic(Channel::Commands),
            status: topic(Channel::Status),
            telemetry: topic(Channel::Telemetry),
            progress: topic(Channel::Progress),
            error: topic(Channel::Error),
            response: topic(Channel::Response),
            device_id,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Commands => &self.commands,
            Channel::Status => &self.status,
            Channel::Telemetry => &self.telemetry,
            Channel::Progress => &self.progress,
            Channel::Error => &self.error,
            Channel::Response => &self.response,
        }
    }

    pub fn commands(&self) -> &str {
        &self.commands
    }

    pub fn is_command_topic(&self, topic: &str) -> bool {
        topic == self.commands
    }
}
