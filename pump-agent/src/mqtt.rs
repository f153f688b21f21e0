//! MQTT session adapter
//!
//! Owns the `rumqttc` event loop in its own task and turns it into
//! [`AgentEvent`]s. The outbound side is a thin [`Gateway`] over
//! `AsyncClient::try_publish`, so the control loop never waits on the network.
//!
//! A session only counts as connected once the broker has acknowledged the
//! command-topic subscription. Until then the gateway refuses to queue
//! records, and whatever the previous session left unsent is dropped.

use crate::agent::{AgentEvent, Gateway};
use crate::config::AgentConfig;
use crate::error::GatewayError;
use crate::topics::DeviceTopics;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, QoS, SubAck, SubscribeReasonCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct MqttGateway {
    client: AsyncClient,
    online: Arc<AtomicBool>,
}

impl MqttGateway {
    pub fn new(client: AsyncClient, online: Arc<AtomicBool>) -> Self {
        Self { client, online }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }
}

impl Gateway for MqttGateway {
    fn send(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), GatewayError> {
        if !self.is_online() {
            return Err(GatewayError::Offline);
        }
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| GatewayError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

pub fn mqtt_options(config: &AgentConfig) -> MqttOptions {
    let mqtt = &config.mqtt;
    let mut options = MqttOptions::new(config.client_id(), mqtt.broker_host.clone(), mqtt.broker_port);
    options.set_keep_alive(mqtt.keep_alive());
    options.set_clean_session(true);
    if let Some(username) = &mqtt.username {
        options.set_credentials(username.clone(), mqtt.password.clone().unwrap_or_default());
    }
    options
}

/// Spawn the session task. Dropping the returned receiver ends the task on its
/// next event; the handle can also be aborted directly.
pub fn connect(
    config: &AgentConfig,
    topics: &DeviceTopics,
) -> (MqttGateway, mpsc::Receiver<AgentEvent>, JoinHandle<()>) {
    let options = mqtt_options(config);
    info!(
        "Connecting to MQTT broker {}:{} as {}",
        config.mqtt.broker_host,
        config.mqtt.broker_port,
        options.client_id()
    );

    let capacity = config.mqtt.channel_capacity;
    let (client, eventloop) = AsyncClient::new(options, capacity);
    let (events_tx, events_rx) = mpsc::channel(capacity);
    let online = Arc::new(AtomicBool::new(false));
    let session = Session {
        client: client.clone(),
        command_topic: topics.commands().to_string(),
        online: online.clone(),
        phase: Phase::Offline,
    };
    let task = tokio::spawn(session.run(eventloop, events_tx, config.mqtt.reconnect_delay()));

    (MqttGateway::new(client, online), events_rx, task)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Offline,
    /// ConnAck received, subscribe request not yet accepted by the client.
    Subscribing,
    AwaitingSubAck,
    Online,
}

struct Session {
    client: AsyncClient,
    command_topic: String,
    online: Arc<AtomicBool>,
    phase: Phase,
}

impl Session {
    async fn run(mut self, mut eventloop: EventLoop, events: mpsc::Sender<AgentEvent>, reconnect_delay: Duration) {
        loop {
            if self.phase == Phase::Subscribing {
                self.request_subscription();
            }

            let event = match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("MQTT session established, subscribing to {}", self.command_topic);
                    self.phase = Phase::Subscribing;
                    None
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) if self.phase == Phase::AwaitingSubAck => {
                    if !granted(&ack) {
                        error!("Broker refused subscription to {}, retrying", self.command_topic);
                        tokio::time::sleep(reconnect_delay).await;
                        self.phase = Phase::Subscribing;
                        continue;
                    }
                    info!("MQTT connected, subscribed to {}", self.command_topic);
                    self.online.store(true, Ordering::Release);
                    self.phase = Phase::Online;
                    Some(AgentEvent::Connected)
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    debug!("Received {} bytes on {}", publish.payload.len(), publish.topic);
                    Some(AgentEvent::Message {
                        topic: publish.topic,
                        payload: publish.payload.to_vec(),
                    })
                }
                Ok(Event::Incoming(Incoming::Disconnect)) => {
                    warn!("Broker closed the session");
                    self.went_offline()
                }
                Ok(_) => None,
                Err(e) => {
                    warn!("MQTT connection error: {}", e);
                    let event = self.went_offline();
                    // Clean session: unsent records from the lost session are stale.
                    if !eventloop.pending.is_empty() {
                        debug!("Dropping {} records queued before the outage", eventloop.pending.len());
                        eventloop.pending.clear();
                    }
                    if let Some(event) = event {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    tokio::time::sleep(reconnect_delay).await;
                    continue;
                }
            };

            if let Some(event) = event {
                if events.send(event).await.is_err() {
                    info!("Agent stopped listening, closing MQTT session");
                    break;
                }
            }
        }
        self.online.store(false, Ordering::Release);
    }

    /// Non-blocking so a full request channel cannot stall the event loop;
    /// retried after every poll until accepted.
    fn request_subscription(&mut self) {
        match self.client.try_subscribe(self.command_topic.as_str(), QoS::AtLeastOnce) {
            Ok(()) => self.phase = Phase::AwaitingSubAck,
            Err(e) => debug!("Subscribe to {} deferred: {}", self.command_topic, e),
        }
    }

    /// Mark the session down. Reports `Disconnected` only if the agent had
    /// been told it was connected.
    fn went_offline(&mut self) -> Option<AgentEvent> {
        self.online.store(false, Ordering::Release);
        let was_online = self.phase == Phase::Online;
        self.phase = Phase::Offline;
        was_online.then_some(AgentEvent::Disconnected)
    }
}

fn granted(ack: &SubAck) -> bool {
    !ack.return_codes.is_empty()
        && ack
            .return_codes
            .iter()
            .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::time::timeout;

    const CONNECT: u8 = 1;
    const PUBLISH: u8 = 3;
    const SUBSCRIBE: u8 = 8;
    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];
    const WAIT: Duration = Duration::from_secs(5);

    /// Minimal MQTT 3.1.1 broker side for one client connection.
    struct FakeBroker {
        listener: TcpListener,
    }

    impl FakeBroker {
        async fn bind() -> Self {
            Self {
                listener: TcpListener::bind("127.0.0.1:0").await.unwrap(),
            }
        }

        fn config(&self) -> AgentConfig {
            let mut config = AgentConfig::default();
            config.mqtt.broker_host = "127.0.0.1".to_string();
            config.mqtt.broker_port = self.listener.local_addr().unwrap().port();
            config.mqtt.reconnect_delay_secs = 0;
            config.mqtt.channel_capacity = 4;
            config
        }

        async fn accept(&self) -> TcpStream {
            let (socket, _) = timeout(WAIT, self.listener.accept()).await.unwrap().unwrap();
            socket
        }

        /// CONNECT/CONNACK, then SUBSCRIBE. Returns the subscribe body.
        async fn handshake(&self) -> (TcpStream, Vec<u8>) {
            let mut socket = self.accept().await;
            let (kind, _) = read_packet(&mut socket).await;
            assert_eq!(kind, CONNECT);
            socket.write_all(&CONNACK).await.unwrap();

            let (kind, body) = read_packet(&mut socket).await;
            assert_eq!(kind, SUBSCRIBE);
            (socket, body)
        }
    }

    async fn read_packet(socket: &mut TcpStream) -> (u8, Vec<u8>) {
        let mut header = [0u8; 1];
        timeout(WAIT, socket.read_exact(&mut header)).await.unwrap().unwrap();

        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let mut byte = [0u8; 1];
            socket.read_exact(&mut byte).await.unwrap();
            remaining |= usize::from(byte[0] & 0x7f) << shift;
            if byte[0] & 0x80 == 0 {
                break;
            }
            shift += 7;
        }

        let mut body = vec![0u8; remaining];
        socket.read_exact(&mut body).await.unwrap();
        (header[0] >> 4, body)
    }

    fn subscribed_topic(body: &[u8]) -> String {
        let len = usize::from(u16::from_be_bytes([body[2], body[3]]));
        String::from_utf8(body[4..4 + len].to_vec()).unwrap()
    }

    fn published_topic(body: &[u8]) -> String {
        let len = usize::from(u16::from_be_bytes([body[0], body[1]]));
        String::from_utf8(body[2..2 + len].to_vec()).unwrap()
    }

    fn suback(subscribe_body: &[u8], code: u8) -> Vec<u8> {
        vec![0x90, 0x03, subscribe_body[0], subscribe_body[1], code]
    }

    fn publish_packet(topic: &str, payload: &[u8]) -> Vec<u8> {
        let remaining = 2 + topic.len() + payload.len();
        assert!(remaining < 128);
        let mut packet = vec![0x30, remaining as u8];
        packet.extend_from_slice(&(topic.len() as u16).to_be_bytes());
        packet.extend_from_slice(topic.as_bytes());
        packet.extend_from_slice(payload);
        packet
    }

    async fn next_event(events: &mut mpsc::Receiver<AgentEvent>) -> AgentEvent {
        timeout(WAIT, events.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn test_options_from_config() {
        let mut config = AgentConfig::default();
        config.mqtt.broker_host = "broker.local".to_string();
        config.mqtt.broker_port = 8883;
        config.mqtt.client_id = Some("bedside-3".to_string());
        config.mqtt.keep_alive_secs = 15;

        let options = mqtt_options(&config);
        assert_eq!(options.client_id(), "bedside-3");
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 8883));
        assert_eq!(options.keep_alive(), Duration::from_secs(15));
        assert!(options.clean_session());
        assert!(options.credentials().is_none());
    }

    #[test]
    fn test_credentials_applied() {
        let mut config = AgentConfig::default();
        config.mqtt.username = Some("pump".to_string());
        config.mqtt.password = Some("secret".to_string());

        let options = mqtt_options(&config);
        assert_eq!(
            options.credentials(),
            Some(("pump".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_subscription_grant() {
        let ok = SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)],
        };
        let refused = SubAck {
            pkid: 1,
            return_codes: vec![SubscribeReasonCode::Failure],
        };
        assert!(granted(&ok));
        assert!(!granted(&refused));
    }

    #[tokio::test]
    async fn test_gateway_refuses_records_before_session() {
        let (client, _eventloop) = AsyncClient::new(MqttOptions::new("t", "localhost", 1883), 4);
        let mut gateway = MqttGateway::new(client, Arc::new(AtomicBool::new(false)));
        assert!(matches!(
            gateway.send("devices/PUMP_0001/status", b"{}".to_vec()),
            Err(GatewayError::Offline)
        ));
    }

    #[tokio::test]
    async fn test_subscribes_before_announcing_connected() {
        let broker = FakeBroker::bind().await;
        let topics = DeviceTopics::new("PUMP_0001");
        let (mut gateway, mut events, session) = connect(&broker.config(), &topics);

        // Nothing may pile up in the request channel ahead of the subscription.
        for _ in 0..8 {
            assert!(gateway.send("devices/PUMP_0001/telemetry", b"{}".to_vec()).is_err());
        }

        let (mut socket, subscribe) = broker.handshake().await;
        assert_eq!(subscribed_topic(&subscribe), "devices/PUMP_0001/commands");
        assert!(events.try_recv().is_err());
        assert!(!gateway.is_online());

        socket.write_all(&suback(&subscribe, 0x01)).await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Connected);
        assert!(gateway.is_online());

        gateway
            .send("devices/PUMP_0001/status", br#"{"status":"healthy"}"#.to_vec())
            .unwrap();
        let (kind, body) = read_packet(&mut socket).await;
        assert_eq!(kind, PUBLISH);
        assert_eq!(published_topic(&body), "devices/PUMP_0001/status");

        session.abort();
    }

    #[tokio::test]
    async fn test_refused_subscription_is_retried() {
        let broker = FakeBroker::bind().await;
        let topics = DeviceTopics::new("PUMP_0001");
        let (_gateway, mut events, session) = connect(&broker.config(), &topics);

        let (mut socket, subscribe) = broker.handshake().await;
        socket.write_all(&suback(&subscribe, 0x80)).await.unwrap();

        let (kind, retry) = read_packet(&mut socket).await;
        assert_eq!(kind, SUBSCRIBE);
        assert!(events.try_recv().is_err());

        socket.write_all(&suback(&retry, 0x01)).await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Connected);

        session.abort();
    }

    #[tokio::test]
    async fn test_session_events_across_reconnect() {
        let broker = FakeBroker::bind().await;
        let topics = DeviceTopics::new("PUMP_0001");
        let (mut gateway, mut events, session) = connect(&broker.config(), &topics);

        let (mut socket, subscribe) = broker.handshake().await;
        socket.write_all(&suback(&subscribe, 0x01)).await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Connected);

        socket
            .write_all(&publish_packet("devices/PUMP_0001/commands", br#"{"command":"STOP_INFUSION"}"#))
            .await
            .unwrap();
        assert_eq!(
            next_event(&mut events).await,
            AgentEvent::Message {
                topic: "devices/PUMP_0001/commands".to_string(),
                payload: br#"{"command":"STOP_INFUSION"}"#.to_vec(),
            }
        );

        drop(socket);
        assert_eq!(next_event(&mut events).await, AgentEvent::Disconnected);
        assert!(matches!(
            gateway.send("devices/PUMP_0001/status", b"{}".to_vec()),
            Err(GatewayError::Offline)
        ));

        // Clean session: the subscription is renewed before the next Connected.
        let (mut socket, subscribe) = broker.handshake().await;
        assert_eq!(subscribed_topic(&subscribe), "devices/PUMP_0001/commands");
        socket.write_all(&suback(&subscribe, 0x01)).await.unwrap();
        assert_eq!(next_event(&mut events).await, AgentEvent::Connected);

        // Once the agent stops listening, the next inbound message ends the task.
        drop(events);
        socket
            .write_all(&publish_packet("devices/PUMP_0001/commands", b"{}"))
            .await
            .unwrap();
        timeout(WAIT, session).await.unwrap().unwrap();
        assert!(!gateway.is_online());
    }
}
