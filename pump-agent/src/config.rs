//! Configuration management
//!
//! Handles:
//! - Device identity
//! - MQTT broker settings and credentials
//! - Telemetry, heartbeat and poll cadences
//! - Optional command-handling behavior
//!
//! Sources, lowest to highest precedence: built-in defaults, a TOML file,
//! environment variables (a `.env` file is read by the binary first).

use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_PATH_VAR: &str = "PUMP_AGENT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "pump-agent.toml";

/// Characters that would change the meaning of `devices/{id}/...` topics.
const TOPIC_RESERVED: [char; 3] = ['/', '+', '#'];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub device: DeviceConfig,
    pub mqtt: MqttConfig,
    pub timing: TimingConfig,
    pub behavior: BehaviorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: Option<String>,
    pub keep_alive_secs: u16,
    pub username: Option<String>,
    #[serde(skip_serializing)] // Never write the password back out
    pub password: Option<String>,
    pub reconnect_delay_secs: u64,
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub telemetry_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Answer Pause/Resume no-ops with a rejected response instead of staying silent.
    pub reject_ignored_commands: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_id: "PUMP_0001".to_string(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: None,
            keep_alive_secs: 60,
            username: None,
            password: None,
            reconnect_delay_secs: 5,
            channel_capacity: 64,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            telemetry_interval_ms: 5_000,
            heartbeat_interval_ms: 30_000,
            poll_interval_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl MqttConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(u64::from(self.keep_alive_secs))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl AgentConfig {
    /// Load from the path in `PUMP_AGENT_CONFIG` (or `pump-agent.toml`), then
    /// apply environment overrides and validate.
    pub async fn load() -> Result<Self> {
        let mut config = Self::load_from(Self::config_file_path()).await?;
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. A missing file means defaults.
    pub async fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn config_file_path() -> PathBuf {
        std::env::var(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Overlay environment variables. `lookup` is injected so tests do not
    /// touch the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(device_id) = lookup("PUMP_DEVICE_ID") {
            self.device.device_id = device_id;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.broker_port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "MQTT_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.device_id.trim().is_empty() {
            return Err(ConfigError::Empty("device.device_id"));
        }
        if self.device.device_id.contains(&TOPIC_RESERVED[..]) {
            return Err(ConfigError::TopicReserved {
                field: "device.device_id",
                value: self.device.device_id.clone(),
            });
        }
        if self.mqtt.broker_host.trim().is_empty() {
            return Err(ConfigError::Empty("mqtt.broker_host"));
        }
        if self.mqtt.channel_capacity == 0 {
            return Err(ConfigError::Zero("mqtt.channel_capacity"));
        }
        let periods = [
            ("timing.telemetry_interval_ms", self.timing.telemetry_interval_ms),
            ("timing.heartbeat_interval_ms", self.timing.heartbeat_interval_ms),
            ("timing.poll_interval_ms", self.timing.poll_interval_ms),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Zero(*name));
        }
        Ok(())
    }

    /// Explicit client id, or one derived from the device id with a random
    /// suffix so two agents for the same device do not kick each other off.
    pub fn client_id(&self) -> String {
        match &self.mqtt.client_id {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                let suffix = uuid::Uuid::new_v4().simple().to_string();
                format!("pump-agent-{}-{}", self.device.device_id, &suffix[..8])
            }
        }
    }
}
