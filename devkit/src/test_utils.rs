/*!
Test harness for the pump agent

Makes scenario tests short:
- Agent wired to a recording gateway, a simulated pump and a manual clock
- Time is advanced explicitly, so telemetry and heartbeats are deterministic
- Assertions on the JSON records published per channel
*/

use crate::mqtt_stub::MockGateway;
use anyhow::Result;
use pump_agent::{Agent, AgentConfig, Channel, ManualClock, PumpState, SimulatedPump};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub type HarnessAgent = Agent<SimulatedPump, MockGateway, ManualClock>;

pub struct TestHarness {
    pub agent: HarnessAgent,
    pub gateway: MockGateway,
    pub clock: ManualClock,
    expectations: Vec<Expectation>,
}

#[derive(Debug)]
struct Expectation {
    channel: Channel,
    expected_count: usize,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(AgentConfig::default())
    }

    pub fn with_config(config: AgentConfig) -> Self {
        env_logger::try_init().ok();

        let gateway = MockGateway::new();
        let clock = ManualClock::new();
        let agent = Agent::new(&config, SimulatedPump::new(), gateway.clone(), clock.clone());

        Self {
            agent,
            gateway,
            clock,
            expectations: Vec::new(),
        }
    }

    /// Shortcut for a harness that has already seen its first connection.
    pub fn connected() -> Self {
        let mut harness = Self::new();
        harness.connect();
        harness
    }

    pub fn connect(&mut self) {
        self.agent.on_connected();
    }

    pub fn disconnect(&mut self) {
        self.agent.on_disconnected();
    }

    pub fn state(&self) -> &PumpState {
        self.agent.state()
    }

    pub fn pump(&self) -> &SimulatedPump {
        self.agent.hardware()
    }

    pub fn pump_mut(&mut self) -> &mut SimulatedPump {
        self.agent.hardware_mut()
    }

    pub fn topic(&self, channel: Channel) -> String {
        self.agent.topics().topic(channel).to_string()
    }

    /// Deliver a command envelope on the device's command topic
    pub fn send_command(&mut self, envelope: &Value) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        self.send_raw(&payload);
        log::info!(
            "Sent command {} ({})",
            envelope["command"].as_str().unwrap_or("?"),
            envelope["commandId"].as_str().unwrap_or("?")
        );
        Ok(())
    }

    pub fn send_raw(&mut self, payload: &[u8]) {
        let topic = self.topic(Channel::Commands);
        self.agent.on_message(&topic, payload);
    }

    /// Move time forward and let the agent run its periodic duties once.
    pub fn advance(&mut self, step: Duration) {
        self.clock.advance(step);
        self.agent.poll_periodic();
    }

    /// Advance `total` in `step` increments, polling after each one.
    pub fn run_for(&mut self, total: Duration, step: Duration) {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let next = step.min(total - elapsed);
            self.advance(next);
            elapsed += next;
        }
    }

    pub fn messages(&self, channel: Channel) -> Vec<Value> {
        self.gateway
            .find_messages_by_topic(&self.topic(channel))
            .iter()
            .filter_map(|msg| msg.json().ok())
            .collect()
    }

    pub fn last(&self, channel: Channel) -> Result<Option<Value>> {
        self.gateway.get_last_json_message(&self.topic(channel))
    }

    pub fn expect_messages(&mut self, channel: Channel, count: usize) -> &mut Self {
        self.expectations.push(Expectation {
            channel,
            expected_count: count,
        });
        self
    }

    pub fn verify_expectations(&self) -> Result<()> {
        for expectation in &self.expectations {
            let actual_count = self.messages(expectation.channel).len();
            if actual_count != expectation.expected_count {
                anyhow::bail!(
                    "Expectation failed for {}: expected {} messages, got {}",
                    expectation.channel,
                    expectation.expected_count,
                    actual_count
                );
            }
            log::info!("{}: {} messages as expected", expectation.channel, actual_count);
        }
        Ok(())
    }

    pub fn assert_field_exists(&self, channel: Channel, field_path: &str) -> Result<()> {
        if let Some(msg) = self.last(channel)? {
            if get_nested_field(&msg, field_path).is_some() {
                return Ok(());
            }
        }
        anyhow::bail!("Field '{}' not found in latest {} message", field_path, channel);
    }

    pub fn assert_field_equals(&self, channel: Channel, field_path: &str, expected: &Value) -> Result<()> {
        if let Some(msg) = self.last(channel)? {
            if let Some(actual) = get_nested_field(&msg, field_path) {
                if actual == expected {
                    return Ok(());
                }
                anyhow::bail!(
                    "Field '{}' mismatch on {}: expected {:?}, got {:?}",
                    field_path,
                    channel,
                    expected,
                    actual
                );
            }
        }
        anyhow::bail!("Field '{}' not found for comparison on {}", field_path, channel);
    }

    pub fn get_stats(&self) -> TestStats {
        let messages = self.gateway.get_published_messages();
        let mut topic_counts = HashMap::new();
        for msg in &messages {
            *topic_counts.entry(msg.topic.clone()).or_insert(0) += 1;
        }

        TestStats {
            total_messages: messages.len(),
            dropped_messages: self.gateway.dropped(),
            topic_counts,
        }
    }

    /// Forget published messages and expectations; agent state is kept.
    pub fn reset(&mut self) {
        self.gateway.clear();
        self.expectations.clear();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn get_nested_field<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        match current {
            Value::Object(obj) => current = obj.get(part)?,
            _ => return None,
        }
    }
    Some(current)
}

#[derive(Debug)]
pub struct TestStats {
    pub total_messages: usize,
    pub dropped_messages: usize,
    pub topic_counts: HashMap<String, usize>,
}

impl TestStats {
    pub fn print(&self) {
        println!("Test statistics:");
        println!("  Total messages: {}", self.total_messages);
        println!("  Dropped while offline: {}", self.dropped_messages);
        for (topic, count) in &self.topic_counts {
            println!("    {}: {} messages", topic, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt_stub::CommandBuilder;
    use serde_json::json;

    #[test]
    fn test_harness_basic_functionality() {
        let mut harness = TestHarness::connected();
        harness.expect_messages(Channel::Status, 1);
        harness.verify_expectations().unwrap();
        harness
            .assert_field_equals(Channel::Status, "status", &json!("healthy"))
            .unwrap();

        harness.send_command(&CommandBuilder::pause("p1")).unwrap();
        assert!(harness.messages(Channel::Response).is_empty());

        let stats = harness.get_stats();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.topic_counts["devices/PUMP_0001/status"], 1);
    }

    #[test]
    fn test_run_for_polls_each_step() {
        let mut harness = TestHarness::connected();
        harness.run_for(Duration::from_secs(20), Duration::from_secs(5));
        assert_eq!(harness.messages(Channel::Telemetry).len(), 4);
    }

    #[test]
    fn test_field_assertions_fail_loudly() {
        let harness = TestHarness::connected();
        assert!(harness
            .assert_field_equals(Channel::Status, "status", &json!("running"))
            .is_err());
        assert!(harness.assert_field_exists(Channel::Telemetry, "flowRate").is_err());
    }

    #[test]
    fn test_nested_field_lookup() {
        let value = json!({"a": {"b": 3}});
        assert_eq!(get_nested_field(&value, "a.b"), Some(&json!(3)));
        assert_eq!(get_nested_field(&value, "a.c"), None);
    }
}
