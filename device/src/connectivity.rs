use anyhow::bail;
use tracing::{info, warn};

use aquanode_common::{topics, BrokerConfig, ConnectionState, DeviceIdentity};

use crate::{channel::MessageChannel, net::NetworkLink};

/// Association must come up within the provisioning-portal window; past it
/// the only recovery path is a restart into reprovisioning.
pub const ASSOCIATION_TIMEOUT_MS: u64 = 180_000;
pub const SESSION_RETRY_DELAY_MS: u64 = 5_000;
pub const MAX_SESSION_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// The session came up this tick: subscribe side effects have run and
    /// the caller owes an immediate status publish.
    pub became_ready: bool,
    /// Association timed out; the caller must restart the device.
    pub restart_required: bool,
}

/// Connection state machine spanning network association and the broker
/// session, advanced once per control-loop tick so reconnection never
/// stalls command or telemetry processing.
pub struct ConnectivityManager {
    state: ConnectionState,
    association_started_ms: Option<u64>,
    session_attempts: u32,
    next_session_attempt_ms: u64,
    unreachable_reported: bool,
}

impl ConnectivityManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            association_started_ms: None,
            session_attempts: 0,
            next_session_attempt_ms: 0,
            unreachable_reported: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_attempts(&self) -> u32 {
        self.session_attempts
    }

    pub fn broker_unreachable(&self) -> bool {
        self.unreachable_reported
    }

    pub fn ensure_connected(
        &mut self,
        now_ms: u64,
        net: &mut dyn NetworkLink,
        channel: &mut dyn MessageChannel,
        config: &BrokerConfig,
        identity: &DeviceIdentity,
    ) -> LinkStatus {
        let mut status = LinkStatus::default();

        if !net.is_connected() {
            match self.state {
                ConnectionState::Disconnected => {
                    net.begin_association();
                    self.association_started_ms = Some(now_ms);
                    self.state = ConnectionState::NetworkConnecting;
                }
                ConnectionState::NetworkConnecting => {
                    let started = *self.association_started_ms.get_or_insert(now_ms);
                    if now_ms.saturating_sub(started) >= ASSOCIATION_TIMEOUT_MS {
                        warn!(
                            "network association did not complete within {}s; restarting into reprovisioning",
                            ASSOCIATION_TIMEOUT_MS / 1000
                        );
                        status.restart_required = true;
                    }
                }
                _ => {
                    warn!("network association lost");
                    channel.disconnect();
                    self.state = ConnectionState::Disconnected;
                }
            }

            status.state = self.state;
            return status;
        }

        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::NetworkConnecting
        ) {
            info!("network associated");
            self.state = ConnectionState::NetworkConnected;
            self.association_started_ms = None;
        }

        match self.state {
            ConnectionState::NetworkConnected => {
                if now_ms >= self.next_session_attempt_ms {
                    self.state = ConnectionState::SessionConnecting;
                    match self.open_session(channel, config, identity) {
                        Ok(()) => {
                            info!(broker = %config.host, "messaging session established");
                            self.state = ConnectionState::Ready;
                            self.session_attempts = 0;
                            self.unreachable_reported = false;
                            status.became_ready = true;
                        }
                        Err(err) => {
                            self.session_attempts += 1;
                            warn!(
                                attempt = self.session_attempts,
                                "broker session attempt failed: {err:#}"
                            );
                            if self.session_attempts >= MAX_SESSION_ATTEMPTS
                                && !self.unreachable_reported
                            {
                                warn!(
                                    "broker unreachable after {MAX_SESSION_ATTEMPTS} attempts; retrying every {}s",
                                    SESSION_RETRY_DELAY_MS / 1000
                                );
                                self.unreachable_reported = true;
                            }
                            self.next_session_attempt_ms = now_ms + SESSION_RETRY_DELAY_MS;
                            self.state = ConnectionState::NetworkConnected;
                        }
                    }
                }
            }
            ConnectionState::Ready => {
                if !channel.is_connected() {
                    warn!("messaging session dropped");
                    self.state = ConnectionState::NetworkConnected;
                    self.next_session_attempt_ms = now_ms;
                }
            }
            _ => {}
        }

        status.state = self.state;
        status
    }

    /// Opens the session and subscribes to the inbound topics, exactly
    /// once per session.
    fn open_session(
        &self,
        channel: &mut dyn MessageChannel,
        config: &BrokerConfig,
        identity: &DeviceIdentity,
    ) -> anyhow::Result<()> {
        if !config.is_connectable() {
            bail!("broker address is not configured");
        }

        channel.connect(config, identity)?;
        channel.subscribe(&topics::commands_topic(
            &identity.organization_id,
            &identity.device_id,
        ))?;
        channel.subscribe(&topics::config_topic(
            &identity.organization_id,
            &identity.device_id,
        ))?;
        Ok(())
    }
}
