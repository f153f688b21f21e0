//! Agent - the single control loop that owns the pump state
//!
//! One task, no locks: inbound events and periodic polls are interleaved by
//! `tokio::select!`, and each one is handled to completion before the next.
//! The transport stays behind [`Gateway`] (outbound) and [`AgentEvent`]
//! (inbound), so the loop runs the same against MQTT or a test double.

use crate::clock::Clock;
use crate::codec;
use crate::config::AgentConfig;
use crate::error::GatewayError;
use crate::hardware::HardwareActuator;
use crate::processor::{CommandProcessor, ProcessorOptions};
use crate::reports::{ErrorReport, Report, Severity, MALFORMED_COMMAND};
use crate::state::PumpState;
use crate::status::StatusReporter;
use crate::telemetry::TelemetryScheduler;
use crate::topics::DeviceTopics;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outbound half of the messaging collaborator.
pub trait Gateway {
    /// Hand `payload` to the transport without waiting for the network.
    fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError>;
}

/// Inbound half of the messaging collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Session (re)established and command topic subscribed.
    Connected,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

pub struct Agent<H, G, C> {
    topics: DeviceTopics,
    state: PumpState,
    hardware: H,
    gateway: G,
    clock: C,
    processor: CommandProcessor,
    telemetry: TelemetryScheduler,
    status: StatusReporter,
    connected: bool,
}

impl<H, G, C> Agent<H, G, C>
where
    H: HardwareActuator,
    G: Gateway,
    C: Clock,
{
    pub fn new(config: &AgentConfig, hardware: H, gateway: G, clock: C) -> Self {
        let started = clock.now().monotonic;
        let processor = CommandProcessor::new(ProcessorOptions {
            reject_ignored_commands: config.behavior.reject_ignored_commands,
        });

        info!(
            "Agent initialized - device: {}, telemetry every {:?}, heartbeat every {:?}",
            config.device.device_id,
            config.timing.telemetry_interval(),
            config.timing.heartbeat_interval()
        );

        Self {
            topics: DeviceTopics::new(config.device.device_id.clone()),
            state: PumpState::new(),
            hardware,
            gateway,
            clock,
            processor,
            telemetry: TelemetryScheduler::new(config.timing.telemetry_interval(), started),
            status: StatusReporter::new(config.timing.heartbeat_interval(), started),
            connected: false,
        }
    }

    pub fn topics(&self) -> &DeviceTopics {
        &self.topics
    }

    pub fn state(&self) -> &PumpState {
        &self.state
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Connected => self.on_connected(),
            AgentEvent::Disconnected => self.on_disconnected(),
            AgentEvent::Message { topic, payload } => self.on_message(&topic, &payload),
        }
    }

    /// Announce liveness. The first status after every (re)connection is `healthy`.
    pub fn on_connected(&mut self) {
        info!("Connected - announcing {} as healthy", self.topics.device_id());
        self.connected = true;
        let announcement = self.status.on_connected(&self.state, self.clock.now());
        self.publish(vec![announcement]);
    }

    /// Periodic duties keep running while disconnected, so delivered volume and
    /// auto-complete stay current; their records are discarded.
    pub fn on_disconnected(&mut self) {
        if self.connected {
            warn!("Connection lost - pump keeps running, records discarded until reconnect");
        }
        self.connected = false;
    }

    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        if !self.topics.is_command_topic(topic) {
            debug!("Ignoring message on unexpected topic: {}", topic);
            return;
        }
        if !self.connected {
            warn!("Dropping command received while disconnected");
            return;
        }

        let now = self.clock.now();
        let reports = match codec::decode_envelope(payload) {
            Ok(envelope) => match envelope.into_command() {
                Ok(command) => self
                    .processor
                    .process(&mut self.state, &mut self.hardware, command, now),
                Err(invalid) => self.processor.reject(&invalid, now),
            },
            Err(e) => {
                warn!("Discarding malformed command: {}", e);
                vec![Report::Error(ErrorReport::new(
                    MALFORMED_COMMAND,
                    e.to_string(),
                    Severity::Low,
                    now.wall,
                ))]
            }
        };
        self.publish(reports);
    }

    /// Run whichever periodic duties are due: telemetry first, then heartbeat.
    pub fn poll_periodic(&mut self) {
        let now = self.clock.now();
        let mut reports = self
            .telemetry
            .poll(&mut self.state, &mut self.hardware, &self.processor, now);
        if let Some(heartbeat) = self.status.poll(&self.state, now) {
            reports.push(heartbeat);
        }
        self.publish(reports);
    }

    /// Records produced while disconnected are discarded, not queued, so a
    /// reconnect never replays stale state ahead of the `healthy` announcement.
    fn publish(&mut self, reports: Vec<Report>) {
        if !self.connected {
            if !reports.is_empty() {
                debug!("Offline, discarding {} record(s)", reports.len());
            }
            return;
        }
        for report in reports {
            let topic = self.topics.topic(report.channel());
            let payload = match codec::encode_report(&report, self.topics.device_id()) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize {} record: {}", report.channel(), e);
                    continue;
                }
            };
            match self.gateway.send(topic, payload) {
                Ok(()) => debug!("Published to {}", topic),
                Err(e) => warn!("Failed to publish to {}: {}", topic, e),
            }
        }
    }
}

impl<H, G, C> Agent<H, G, C>
where
    H: HardwareActuator + Send,
    G: Gateway + Send,
    C: Clock + Send,
{
    /// Drive the agent until the event channel closes, then hand it back.
    pub async fn run(mut self, mut events: mpsc::Receiver<AgentEvent>, poll_every: Duration) -> Self {
        info!("Starting agent control loop for {}", self.topics.device_id());
        let mut ticker = interval(poll_every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Event channel closed, stopping control loop");
                        break;
                    }
                },
                _ = ticker.tick() => self.poll_periodic(),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, TokioClock};
    use crate::hardware::{ActuatorCall, SimulatedPump};
    use crate::topics::Channel;
    use serde_json::{json, Value};

    /// Records publishes; can be switched offline.
    #[derive(Default)]
    struct RecordingGateway {
        sent: Vec<(String, Value)>,
        offline: bool,
        failed: usize,
    }

    impl RecordingGateway {
        fn on(&self, topic: &str) -> Vec<&Value> {
            self.sent.iter().filter(|(t, _)| t == topic).map(|(_, v)| v).collect()
        }
    }

    impl Gateway for RecordingGateway {
        fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
            if self.offline {
                self.failed += 1;
                return Err(GatewayError::Offline);
            }
            let value = serde_json::from_slice(&payload).expect("agent published invalid JSON");
            self.sent.push((topic.to_string(), value));
            Ok(())
        }
    }

    fn agent(clock: ManualClock) -> Agent<SimulatedPump, RecordingGateway, ManualClock> {
        Agent::new(
            &AgentConfig::default(),
            SimulatedPump::new(),
            RecordingGateway::default(),
            clock,
        )
    }

    fn command(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_connected_announces_healthy() {
        let mut agent = agent(ManualClock::new());
        agent.handle_event(AgentEvent::Connected);

        let status = agent.gateway().on("devices/PUMP_0001/status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0]["status"], "healthy");
        assert_eq!(status[0]["deviceId"], "PUMP_0001");
    }

    #[test]
    fn test_command_round_trip() {
        let mut agent = agent(ManualClock::new());
        agent.on_connected();
        agent.on_message(
            "devices/PUMP_0001/commands",
            &command(json!({
                "command": "START_INFUSION",
                "commandId": "abc",
                "payload": {"flowRate": 1, "duration": 30, "volume": 30, "medication": "Saline"}
            })),
        );

        assert!(agent.state().is_running());
        let responses = agent.gateway().on("devices/PUMP_0001/response");
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["commandId"], "abc");
        assert_eq!(responses[0]["status"], "success");
        let status = agent.gateway().on("devices/PUMP_0001/status");
        assert_eq!(status.last().unwrap()["status"], "running");
    }

    #[test]
    fn test_malformed_payload_reports_error() {
        let mut agent = agent(ManualClock::new());
        agent.on_connected();
        agent.on_message("devices/PUMP_0001/commands", b"{not json");

        let errors = agent.gateway().on("devices/PUMP_0001/error");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["errorCode"], "MALFORMED_COMMAND");
        assert_eq!(errors[0]["severity"], "low");
        assert!(agent.gateway().on("devices/PUMP_0001/response").is_empty());
    }

    #[test]
    fn test_messages_ignored_when_disconnected_or_off_topic() {
        let mut agent = agent(ManualClock::new());
        let start = command(json!({
            "command": "START_INFUSION",
            "commandId": "abc",
            "payload": {"flowRate": 1, "duration": 30, "volume": 30, "medication": "Saline"}
        }));

        agent.on_message("devices/PUMP_0001/commands", &start);
        assert!(!agent.state().is_running());

        agent.on_connected();
        agent.on_message("devices/PUMP_0002/commands", &start);
        assert!(!agent.state().is_running());
        assert!(agent.hardware().calls().is_empty());
    }

    #[test]
    fn test_periodic_duties_survive_disconnection() {
        let clock = ManualClock::new();
        let mut agent = agent(clock.clone());
        agent.on_connected();
        agent.on_message(
            "devices/PUMP_0001/commands",
            &command(json!({
                "command": "START_INFUSION",
                "commandId": "abc",
                "payload": {"flowRate": 1, "duration": 30, "volume": 30, "medication": "Saline"}
            })),
        );
        agent.on_disconnected();
        let sent_before_outage = agent.gateway().sent.len();

        clock.advance(Duration::from_secs(60));
        agent.poll_periodic();
        assert_eq!(agent.state().current_volume(), 1.0);
        assert_eq!(agent.gateway().sent.len(), sent_before_outage);

        agent.on_connected();
        let (topic, first) = &agent.gateway().sent[sent_before_outage];
        assert_eq!(topic, "devices/PUMP_0001/status");
        assert_eq!(first["status"], "healthy");
        assert_eq!(first["isRunning"], true);

        clock.advance(Duration::from_secs(5));
        agent.poll_periodic();
        assert_eq!(agent.gateway().on("devices/PUMP_0001/telemetry").len(), 1);
    }

    #[test]
    fn test_transport_failure_while_connected_is_tolerated() {
        let clock = ManualClock::new();
        let mut agent = agent(clock.clone());
        agent.on_connected();
        agent.gateway.offline = true;

        clock.advance(Duration::from_secs(30));
        agent.poll_periodic();
        assert_eq!(agent.gateway().failed, 2);

        agent.gateway.offline = false;
        clock.advance(Duration::from_secs(5));
        agent.poll_periodic();
        assert_eq!(agent.gateway().on("devices/PUMP_0001/telemetry").len(), 1);
    }

    #[test]
    fn test_every_outbound_channel_uses_device_topic() {
        let agent = agent(ManualClock::new());
        for channel in Channel::OUTBOUND {
            assert!(agent.topics().topic(channel).starts_with("devices/PUMP_0001/"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_drives_telemetry_and_commands() {
        let (tx, rx) = mpsc::channel(8);
        let agent = Agent::new(
            &AgentConfig::default(),
            SimulatedPump::new(),
            RecordingGateway::default(),
            TokioClock::new(),
        );
        let handle = tokio::spawn(agent.run(rx, Duration::from_millis(100)));

        tx.send(AgentEvent::Connected).await.unwrap();
        tx.send(AgentEvent::Message {
            topic: "devices/PUMP_0001/commands".to_string(),
            payload: command(json!({
                "command": "START_INFUSION",
                "commandId": "run-1",
                "payload": {"flowRate": 10, "duration": 60, "volume": 5, "medication": "X"}
            })),
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(31)).await;
        drop(tx);
        let agent = handle.await.unwrap();

        assert!(!agent.state().is_running());
        assert_eq!(agent.hardware().last_call(), Some(&ActuatorCall::Stop));
        let responses = agent.gateway().on("devices/PUMP_0001/response");
        assert_eq!(responses.last().unwrap()["commandId"], "auto_complete");
    }
}
