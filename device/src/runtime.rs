use std::{
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use tracing::{info, warn};

use aquanode_common::{
    config::{DEVICE_NAMESPACE, SENSOR_NAMESPACE},
    store::KeyValueStore,
    topics, AdcReader, BrokerConfig, ConnectionState, DeviceIdentity, SensorEngine,
    TelemetryScheduler,
};
use aquanode_common::{
    AlertPayload, SensorValues, StatusPayload, TelemetryMetadata, TelemetryPayload,
};

use crate::{
    channel::{MessageChannel, MqttChannel},
    connectivity::ConnectivityManager,
    dispatch::{CommandDispatcher, DispatchCtx},
    flash::{FirmwareFlash, StagedFirmwareFile},
    net::{HostNetwork, NetworkLink},
    ota::OtaUpdater,
    platform::{HostSystem, SystemCtl, FIRMWARE_VERSION},
    sim::SimulatedAdc,
    store::{data_dir, FileKvStore},
    update::{HttpUpdateTransport, UpdateTransport},
};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Injected capability implementations the runtime is composed from.
pub struct Ports {
    pub device_store: Box<dyn KeyValueStore>,
    pub sensor_store: Box<dyn KeyValueStore>,
    pub adc: Box<dyn AdcReader>,
    pub channel: Box<dyn MessageChannel>,
    pub net: Box<dyn NetworkLink>,
    pub transport: Box<dyn UpdateTransport>,
    pub flash: Box<dyn FirmwareFlash>,
    pub sysctl: Box<dyn SystemCtl>,
}

/// Owns all device state and drives the single-threaded control loop: one
/// tick advances connectivity, pumps inbound messages, evaluates the
/// telemetry and status gates, and runs the rate-limited update check.
pub struct DeviceRuntime {
    identity: DeviceIdentity,
    config: BrokerConfig,
    device_store: Box<dyn KeyValueStore>,
    engine: SensorEngine,
    scheduler: TelemetryScheduler,
    connectivity: ConnectivityManager,
    dispatcher: CommandDispatcher,
    ota: OtaUpdater,
    channel: Box<dyn MessageChannel>,
    net: Box<dyn NetworkLink>,
    transport: Box<dyn UpdateTransport>,
    flash: Box<dyn FirmwareFlash>,
    sysctl: Box<dyn SystemCtl>,
}

impl DeviceRuntime {
    pub fn new(ports: Ports) -> anyhow::Result<Self> {
        let Ports {
            mut device_store,
            sensor_store,
            adc,
            channel,
            net,
            transport,
            flash,
            sysctl,
        } = ports;

        let (identity, provisioned) =
            DeviceIdentity::load_or_provision(device_store.as_mut(), sysctl.unique_id())?;

        let mut config = BrokerConfig::load(device_store.as_ref())?;
        config.sanitize();
        apply_env_overrides(&mut config);
        if provisioned {
            config.save(device_store.as_mut())?;
            info!(device_id = %identity.device_id, "provisioned new device identity");
        }

        let engine = SensorEngine::new(adc, sensor_store)?;
        let ota = OtaUpdater::new(
            OtaUpdater::server_url_from_broker(&config.host),
            identity.device_id.clone(),
            FIRMWARE_VERSION.to_string(),
        );

        Ok(Self {
            identity,
            config,
            device_store,
            engine,
            scheduler: TelemetryScheduler::new(),
            connectivity: ConnectivityManager::new(),
            dispatcher: CommandDispatcher::new(),
            ota,
            channel,
            net,
            transport,
            flash,
            sysctl,
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connectivity.state()
    }

    pub fn tick(&mut self, now_ms: u64) {
        let link = self.connectivity.ensure_connected(
            now_ms,
            self.net.as_mut(),
            self.channel.as_mut(),
            &self.config,
            &self.identity,
        );

        if link.restart_required {
            self.sysctl.restart();
            return;
        }
        if link.state != ConnectionState::Ready {
            return;
        }

        if link.became_ready && self.publish_status() {
            self.scheduler.mark_status_sent(now_ms);
        }

        for message in self.channel.poll() {
            let mut ctx = DispatchCtx {
                engine: &mut self.engine,
                ota: &mut self.ota,
                config: &mut self.config,
                device_store: self.device_store.as_mut(),
                channel: self.channel.as_mut(),
                transport: self.transport.as_mut(),
                flash: self.flash.as_mut(),
                sysctl: self.sysctl.as_mut(),
                identity: &self.identity,
            };
            self.dispatcher
                .on_message(&message.topic, &message.payload, &mut ctx);
        }

        if self
            .scheduler
            .due_for_telemetry(now_ms, self.config.telemetry_interval_ms)
            && self.publish_telemetry(now_ms)
        {
            self.scheduler.mark_telemetry_sent(now_ms);
        }

        if self.scheduler.due_for_status(now_ms) && self.publish_status() {
            self.scheduler.mark_status_sent(now_ms);
        }

        self.ota.check_for_update(
            now_ms,
            self.transport.as_mut(),
            self.flash.as_mut(),
            self.sysctl.as_mut(),
        );
    }

    fn publish_telemetry(&mut self, now_ms: u64) -> bool {
        let Some(reading) = self.engine.read_all(now_ms) else {
            warn!("no valid sensor reading available; telemetry deferred");
            return false;
        };

        if self.engine.detect_failure(now_ms) {
            self.publish_alert("warning", "Sensor failure detected");
        }

        let payload = TelemetryPayload {
            device_id: self.identity.device_id.clone(),
            organization_id: self.identity.organization_id.clone(),
            timestamp: epoch_seconds(),
            sensors: SensorValues {
                ph: reading.ph,
                chlorine: reading.chlorine,
                temperature: reading.temperature,
                orp: reading.orp,
            },
            metadata: TelemetryMetadata {
                battery: self.sysctl.battery_percent(),
                signal_strength: self.net.signal_strength_dbm(),
                firmware_version: FIRMWARE_VERSION.to_string(),
            },
        };

        let topic =
            topics::telemetry_topic(&self.identity.organization_id, &self.identity.device_id);
        match serde_json::to_vec(&payload) {
            Ok(body) => match self.channel.publish(&topic, &body) {
                Ok(()) => true,
                Err(err) => {
                    warn!("telemetry publish failed: {err:#}");
                    false
                }
            },
            Err(err) => {
                warn!("telemetry serialization failed: {err}");
                false
            }
        }
    }

    fn publish_status(&mut self) -> bool {
        let payload = StatusPayload {
            status: "online",
            battery: self.sysctl.battery_percent(),
            signal_strength: self.net.signal_strength_dbm(),
            firmware_version: FIRMWARE_VERSION.to_string(),
            timestamp: epoch_seconds(),
        };

        let topic = topics::status_topic(&self.identity.organization_id, &self.identity.device_id);
        match serde_json::to_vec(&payload) {
            Ok(body) => match self.channel.publish(&topic, &body) {
                Ok(()) => true,
                Err(err) => {
                    warn!("status publish failed: {err:#}");
                    false
                }
            },
            Err(err) => {
                warn!("status serialization failed: {err}");
                false
            }
        }
    }

    fn publish_alert(&mut self, severity: &'static str, message: &str) {
        let payload = AlertPayload {
            severity,
            message: message.to_string(),
            timestamp: epoch_seconds(),
        };

        let topic = topics::alert_topic(&self.identity.organization_id, &self.identity.device_id);
        match serde_json::to_vec(&payload) {
            Ok(body) => {
                if let Err(err) = self.channel.publish(&topic, &body) {
                    warn!("alert publish failed: {err:#}");
                }
            }
            Err(err) => warn!("alert serialization failed: {err}"),
        }
    }
}

/// Composition root for the host build.
pub fn run() -> anyhow::Result<()> {
    let ports = Ports {
        device_store: Box::new(FileKvStore::open(DEVICE_NAMESPACE)?),
        sensor_store: Box::new(FileKvStore::open(SENSOR_NAMESPACE)?),
        adc: Box::new(SimulatedAdc::new()),
        channel: Box::new(MqttChannel::new()),
        net: Box::new(HostNetwork::new()),
        transport: Box::new(HttpUpdateTransport::new()?),
        flash: Box::new(StagedFirmwareFile::new(data_dir().join("update"))),
        sysctl: Box::new(HostSystem::new()),
    };

    let mut runtime = DeviceRuntime::new(ports)?;
    info!(
        version = FIRMWARE_VERSION,
        device_id = %runtime.identity().device_id,
        broker = %runtime.config().host,
        "device runtime starting"
    );

    loop {
        runtime.tick(monotonic_ms());
        thread::sleep(TICK_INTERVAL);
    }
}

fn apply_env_overrides(config: &mut BrokerConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        config.host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        config.port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        config.username = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        config.password = pass;
    }
}

fn epoch_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use aquanode_common::{AdcReader, MemoryStore};

    use super::*;
    use crate::testutil::{
        FixedAdc, SharedChannel, SharedFlash, SharedKvStore, SharedNet, SharedSysctl,
        SharedTransport, TestEvents,
    };

    struct Fixture {
        runtime: DeviceRuntime,
        channel: SharedChannel,
        net: SharedNet,
        sysctl: SharedSysctl,
        device_store: SharedKvStore,
        events: TestEvents,
    }

    fn fixture() -> Fixture {
        fixture_with_adc(Box::new(SimulatedAdc::new()))
    }

    fn fixture_with_adc(adc: Box<dyn AdcReader>) -> Fixture {
        let events = TestEvents::default();
        let channel = SharedChannel::new(events.clone());
        let net = SharedNet::new(true);
        let sysctl = SharedSysctl::new(events.clone());
        let device_store = SharedKvStore::default();

        let runtime = DeviceRuntime::new(Ports {
            device_store: Box::new(device_store.clone()),
            sensor_store: Box::new(MemoryStore::new()),
            adc,
            channel: Box::new(channel.clone()),
            net: Box::new(net.clone()),
            transport: Box::new(SharedTransport::default()),
            flash: Box::new(SharedFlash::with_capacity(1 << 20)),
            sysctl: Box::new(sysctl.clone()),
        })
        .unwrap();

        Fixture {
            runtime,
            channel,
            net,
            sysctl,
            device_store,
            events,
        }
    }

    fn topic(fixture: &Fixture, kind: &str) -> String {
        let identity = fixture.runtime.identity();
        format!(
            "devices/{}/{}/{kind}",
            identity.organization_id, identity.device_id
        )
    }

    #[test]
    fn first_boot_provisions_and_announces_itself() {
        let mut fixture = fixture();

        assert_eq!(fixture.runtime.identity().device_id, "aqua-00c0ffee");
        assert_eq!(
            fixture.device_store.0.borrow().get_bool("init").unwrap(),
            Some(true)
        );

        fixture.runtime.tick(0);

        assert_eq!(fixture.runtime.connection_state(), ConnectionState::Ready);
        assert_eq!(
            fixture.channel.state.borrow().subscriptions,
            vec![topic(&fixture, "commands"), topic(&fixture, "config")]
        );

        let statuses = fixture.channel.published_on(&topic(&fixture, "status"));
        assert_eq!(statuses.len(), 1);
        let status: serde_json::Value = serde_json::from_slice(&statuses[0]).unwrap();
        assert_eq!(status["status"], "online");
        assert_eq!(status["firmware_version"], FIRMWARE_VERSION);
    }

    #[test]
    fn telemetry_fires_once_per_interval() {
        let mut fixture = fixture();
        let telemetry_topic = topic(&fixture, "telemetry");

        fixture.runtime.tick(0);
        assert!(fixture.channel.published_on(&telemetry_topic).is_empty());

        fixture.runtime.tick(30_000);
        assert_eq!(fixture.channel.published_on(&telemetry_topic).len(), 1);

        // Sub-interval ticks do not duplicate-fire.
        for tick in 1..10 {
            fixture.runtime.tick(30_000 + tick * 100);
        }
        assert_eq!(fixture.channel.published_on(&telemetry_topic).len(), 1);

        fixture.runtime.tick(60_000);
        assert_eq!(fixture.channel.published_on(&telemetry_topic).len(), 2);

        let body: serde_json::Value =
            serde_json::from_slice(&fixture.channel.published_on(&telemetry_topic)[0]).unwrap();
        assert_eq!(body["device_id"], "aqua-00c0ffee");
        assert_eq!(body["metadata"]["battery"], 85);
        let ph = body["sensors"]["ph"].as_f64().unwrap();
        assert!((0.0..=14.0).contains(&ph));
    }

    #[test]
    fn failed_telemetry_publish_retries_next_tick() {
        let mut fixture = fixture();
        let telemetry_topic = topic(&fixture, "telemetry");

        fixture.runtime.tick(0);

        fixture.channel.state.borrow_mut().fail_publish = true;
        fixture.runtime.tick(30_000);
        assert!(fixture.channel.published_on(&telemetry_topic).is_empty());

        fixture.channel.state.borrow_mut().fail_publish = false;
        fixture.runtime.tick(30_100);
        assert_eq!(fixture.channel.published_on(&telemetry_topic).len(), 1);
    }

    #[test]
    fn reboot_command_acks_before_restart() {
        let mut fixture = fixture();
        fixture.runtime.tick(0);

        fixture.channel.push_inbound(
            topic(&fixture, "commands"),
            br#"{"command_id":"c1","command":"reboot"}"#.to_vec(),
        );
        fixture.runtime.tick(100);

        let responses = fixture
            .channel
            .published_on(&topic(&fixture, "command_response"));
        assert_eq!(responses.len(), 1);
        let response: serde_json::Value = serde_json::from_slice(&responses[0]).unwrap();
        assert_eq!(response["command_id"], "c1");
        assert_eq!(response["success"], true);

        let events = fixture.events.snapshot();
        let publish_index = events
            .iter()
            .position(|event| event.ends_with("/command_response"))
            .unwrap();
        let restart_index = events.iter().position(|event| event == "restart").unwrap();
        assert!(publish_index < restart_index);
        assert_eq!(fixture.sysctl.state.borrow().restarts, 1);
    }

    #[test]
    fn config_command_shortens_the_telemetry_cadence() {
        let mut fixture = fixture();
        fixture.runtime.tick(0);

        fixture.channel.push_inbound(
            topic(&fixture, "config"),
            br#"{"config":{"telemetry_interval":5000}}"#.to_vec(),
        );
        fixture.runtime.tick(100);

        assert_eq!(fixture.runtime.config().telemetry_interval_ms, 5_000);
        assert_eq!(
            fixture.device_store.0.borrow().get_i64("telInt").unwrap(),
            Some(5_000)
        );

        fixture.runtime.tick(5_100);
        assert_eq!(
            fixture.channel.published_on(&topic(&fixture, "telemetry")).len(),
            1
        );
    }

    #[test]
    fn stuck_sensor_raises_an_alert_alongside_telemetry() {
        let mut fixture = fixture_with_adc(Box::new(FixedAdc::default()));
        let alert_topic = topic(&fixture, "alert");

        fixture.runtime.tick(0);

        // Telemetry cycle 1 primes the tracking, cycles 2..=11 count as
        // near-duplicates, cycle 12 crosses the stuck threshold.
        for cycle in 1..=11u64 {
            fixture.runtime.tick(cycle * 30_000);
            assert!(fixture.channel.published_on(&alert_topic).is_empty());
        }

        fixture.runtime.tick(12 * 30_000);
        let alerts = fixture.channel.published_on(&alert_topic);
        assert_eq!(alerts.len(), 1);
        let alert: serde_json::Value = serde_json::from_slice(&alerts[0]).unwrap();
        assert_eq!(alert["severity"], "warning");

        // The device keeps reporting on cached data; telemetry continued
        // throughout.
        assert_eq!(
            fixture.channel.published_on(&topic(&fixture, "telemetry")).len(),
            12
        );
    }

    #[test]
    fn network_loss_pauses_publishing_until_recovery() {
        let mut fixture = fixture();
        fixture.runtime.tick(0);

        fixture.net.connected.set(false);
        fixture.runtime.tick(30_000);
        assert!(fixture
            .channel
            .published_on(&topic(&fixture, "telemetry"))
            .is_empty());

        fixture.net.connected.set(true);
        // One tick to re-associate and reopen the session, one to publish.
        fixture.runtime.tick(30_100);
        fixture.runtime.tick(30_200);
        assert_eq!(
            fixture.channel.published_on(&topic(&fixture, "telemetry")).len(),
            1
        );
    }
}
