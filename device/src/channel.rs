use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use rumqttc::{Client, Connection, Event, Incoming, MqttOptions, QoS, RecvTimeoutError, Transport};
use tracing::warn;

use aquanode_common::{BrokerConfig, DeviceIdentity};

pub const MAX_INBOUND_PAYLOAD_BYTES: usize = 512;

const SESSION_OPEN_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_BUDGET: Duration = Duration::from_millis(20);
const FLUSH_BUDGET: Duration = Duration::from_millis(50);
const PUMP_SLICE: Duration = Duration::from_millis(10);
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const EVENT_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Publish/subscribe session against the broker. `connect` blocks until the
/// session is acknowledged; `poll` drains inbound messages accumulated
/// since the previous tick.
pub trait MessageChannel {
    fn connect(&mut self, config: &BrokerConfig, identity: &DeviceIdentity) -> anyhow::Result<()>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()>;
    fn poll(&mut self) -> Vec<InboundMessage>;
}

pub struct MqttChannel {
    session: Option<MqttSession>,
}

struct MqttSession {
    client: Client,
    connection: Connection,
    connected: bool,
    inbound: VecDeque<InboundMessage>,
}

impl MqttChannel {
    pub fn new() -> Self {
        Self { session: None }
    }
}

impl MqttSession {
    /// Drives the client event loop for at most `budget`, buffering
    /// inbound publishes and tracking session liveness.
    fn pump(&mut self, budget: Duration) {
        let deadline = Instant::now() + budget;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.connection.recv_timeout(remaining.min(PUMP_SLICE)) {
                Ok(Ok(Event::Incoming(Incoming::Publish(publish)))) => {
                    if publish.payload.len() > MAX_INBOUND_PAYLOAD_BYTES {
                        warn!(
                            topic = %publish.topic,
                            bytes = publish.payload.len(),
                            "dropping oversized inbound payload"
                        );
                        continue;
                    }
                    self.inbound.push_back(InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
                Ok(Ok(Event::Incoming(Incoming::ConnAck(_)))) => {
                    self.connected = true;
                }
                Ok(Ok(Event::Incoming(Incoming::Disconnect))) => {
                    self.connected = false;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!("mqtt connection error: {err}");
                    self.connected = false;
                    break;
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.connected = false;
                    break;
                }
            }
        }
    }
}

impl MessageChannel for MqttChannel {
    fn connect(&mut self, config: &BrokerConfig, identity: &DeviceIdentity) -> anyhow::Result<()> {
        self.session = None;

        let client_id = format!("aquanode-{}", identity.device_id);
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }
        if config.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, connection) = Client::new(options, EVENT_QUEUE_CAPACITY);
        let mut session = MqttSession {
            client,
            connection,
            connected: false,
            inbound: VecDeque::new(),
        };

        let deadline = Instant::now() + SESSION_OPEN_TIMEOUT;
        while !session.connected {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(anyhow!(
                    "broker did not acknowledge the session within {SESSION_OPEN_TIMEOUT:?}"
                ));
            }

            // A refused connection surfaces as a connection error below; a
            // ConnAck event only arrives for an accepted session.
            match session.connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Incoming::ConnAck(_)))) => {
                    session.connected = true;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(anyhow!("broker session failed: {err}")),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(anyhow!(
                        "broker did not acknowledge the session within {SESSION_OPEN_TIMEOUT:?}"
                    ))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(anyhow!("mqtt event channel closed during connect"))
                }
            }
        }

        self.session = Some(session);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.client.disconnect();
        }
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| session.connected)
            .unwrap_or(false)
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("no active session"))?;
        session
            .client
            .subscribe(topic, QoS::AtMostOnce)
            .with_context(|| format!("failed to subscribe to {topic}"))?;
        session.pump(FLUSH_BUDGET);
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| anyhow!("no active session"))?;
        session
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .with_context(|| format!("failed to publish to {topic}"))?;
        // Push the write to the socket before returning, so an ack ordered
        // before a restart actually leaves the device.
        session.pump(FLUSH_BUDGET);
        Ok(())
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.pump(POLL_BUDGET);
        session.inbound.drain(..).collect()
    }
}
