/*!
# Pump DevKit - test doubles and helpers for the pump agent

Library for exercising the agent without a broker or a real pump:
- Recording gateway in place of the MQTT client
- Command envelope builders
- Scenario harness on a manual clock
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{CommandBuilder, MockGateway, MockMessage};
pub use test_utils::{TestHarness, TestStats};
