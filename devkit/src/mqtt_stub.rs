/*!
Mock gateway for developing against the agent without a broker

Stands in for the MQTT session: records every publish the agent makes and can
be switched offline to simulate a dropped connection.
*/

use anyhow::Result;
use parking_lot::Mutex;
use pump_agent::error::GatewayError;
use pump_agent::Gateway;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MockMessage {
    pub fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

/// Recording [`Gateway`]. Clones share the same log, so a test can keep a
/// handle while the agent owns another.
#[derive(Clone, Default)]
pub struct MockGateway {
    published_messages: Arc<Mutex<Vec<MockMessage>>>,
    offline: Arc<Mutex<bool>>,
    dropped: Arc<Mutex<usize>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every send fails and is counted as dropped.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
        log::info!("[MOCK] Gateway {}", if offline { "offline" } else { "online" });
    }

    pub fn dropped(&self) -> usize {
        *self.dropped.lock()
    }

    pub fn get_published_messages(&self) -> Vec<MockMessage> {
        self.published_messages.lock().clone()
    }

    pub fn find_messages_by_topic(&self, topic: &str) -> Vec<MockMessage> {
        self.published_messages
            .lock()
            .iter()
            .filter(|msg| msg.topic == topic)
            .cloned()
            .collect()
    }

    /// Parse the latest message on a topic
    pub fn get_last_json_message<T>(&self, topic: &str) -> Result<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let messages = self.find_messages_by_topic(topic);
        if let Some(last_msg) = messages.last() {
            let parsed: T = serde_json::from_slice(&last_msg.payload)?;
            Ok(Some(parsed))
        } else {
            Ok(None)
        }
    }

    pub fn clear(&self) {
        self.published_messages.lock().clear();
        *self.dropped.lock() = 0;
    }
}

impl Gateway for MockGateway {
    fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        if *self.offline.lock() {
            *self.dropped.lock() += 1;
            return Err(GatewayError::Offline);
        }

        log::debug!("[MOCK] Published to {}: {} bytes", topic, payload.len());
        self.published_messages.lock().push(MockMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Builds command envelopes in the agent's wire format
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn start(
        command_id: &str,
        flow_rate: f64,
        duration_min: u32,
        volume: f64,
        medication: &str,
    ) -> Value {
        Self::envelope(
            "START_INFUSION",
            command_id,
            json!({
                "flowRate": flow_rate,
                "duration": duration_min,
                "volume": volume,
                "medication": medication,
                "priority": "normal"
            }),
        )
    }

    pub fn stop(command_id: &str) -> Value {
        Self::envelope("STOP_INFUSION", command_id, json!({}))
    }

    pub fn emergency_stop(command_id: &str, reason: &str) -> Value {
        Self::envelope(
            "STOP_INFUSION",
            command_id,
            json!({ "reason": reason, "emergency": true }),
        )
    }

    pub fn pause(command_id: &str) -> Value {
        Self::envelope("PAUSE_INFUSION", command_id, json!({}))
    }

    pub fn resume(command_id: &str) -> Value {
        Self::envelope("RESUME_INFUSION", command_id, json!({}))
    }

    pub fn envelope(command: &str, command_id: &str, payload: Value) -> Value {
        json!({
            "command": command,
            "commandId": command_id,
            "payload": payload,
            "timestamp": chrono::Utc::now().to_rfc3339()
        })
    }
}
