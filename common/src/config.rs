use tracing::warn;

use crate::store::{KeyValueStore, StoreResult};

pub const DEVICE_NAMESPACE: &str = "device";
pub const SENSOR_NAMESPACE: &str = "sensors";

pub const DEFAULT_BROKER_HOST: &str = "mqtt.yourdomain.com";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_TELEMETRY_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_ORGANIZATION: &str = "unassigned";

const KEY_INIT: &str = "init";
const KEY_DEVICE_ID: &str = "deviceId";
const KEY_ORG_ID: &str = "orgId";
const KEY_BROKER: &str = "mqttBroker";
const KEY_PORT: &str = "mqttPort";
const KEY_USER: &str = "mqttUser";
const KEY_PASS: &str = "mqttPass";
const KEY_USE_TLS: &str = "useTLS";
const KEY_TELEMETRY_INTERVAL: &str = "telInt";

const KEY_PH_OFFSET: &str = "phOffset";
const KEY_PH_SCALE: &str = "phScale";
const KEY_TEMP_OFFSET: &str = "tempOffset";
const KEY_TEMP_SCALE: &str = "tempScale";
const KEY_ORP_OFFSET: &str = "orpOffset";
const KEY_ORP_SCALE: &str = "orpScale";

/// Identity assigned on first boot and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub organization_id: String,
}

impl DeviceIdentity {
    /// Loads the persisted identity, or generates one from a
    /// hardware-unique value and persists it. The second element of the
    /// returned pair is true when the device was provisioned just now.
    pub fn load_or_provision(
        store: &mut dyn KeyValueStore,
        unique_id: u64,
    ) -> StoreResult<(Self, bool)> {
        if store.get_bool(KEY_INIT)?.unwrap_or(false) {
            let device_id = store.get_str(KEY_DEVICE_ID)?.unwrap_or_default();
            if !device_id.is_empty() {
                let organization_id = store
                    .get_str(KEY_ORG_ID)?
                    .filter(|value| !value.is_empty())
                    .unwrap_or_else(|| DEFAULT_ORGANIZATION.to_string());
                return Ok((
                    Self {
                        device_id,
                        organization_id,
                    },
                    false,
                ));
            }
        }

        let identity = Self {
            device_id: format!("aqua-{:08x}", (unique_id & 0xffff_ffff) as u32),
            organization_id: DEFAULT_ORGANIZATION.to_string(),
        };
        warn!(
            device_id = %identity.device_id,
            "no provisioned identity found; organization defaults to `{DEFAULT_ORGANIZATION}`"
        );

        store.put_str(KEY_DEVICE_ID, &identity.device_id)?;
        store.put_str(KEY_ORG_ID, &identity.organization_id)?;
        store.put_bool(KEY_INIT, true)?;
        Ok((identity, true))
    }
}

/// Messaging endpoint settings plus the telemetry cadence. Mutated only by
/// an authenticated config command and persisted on every mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    pub telemetry_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            username: String::new(),
            password: String::new(),
            use_tls: false,
            telemetry_interval_ms: DEFAULT_TELEMETRY_INTERVAL_MS,
        }
    }
}

impl BrokerConfig {
    pub fn load(store: &dyn KeyValueStore) -> StoreResult<Self> {
        let defaults = Self::default();
        let port = store
            .get_i64(KEY_PORT)?
            .and_then(|value| u16::try_from(value).ok())
            .unwrap_or(defaults.port);
        let telemetry_interval_ms = store
            .get_i64(KEY_TELEMETRY_INTERVAL)?
            .and_then(|value| u64::try_from(value).ok())
            .unwrap_or(defaults.telemetry_interval_ms);

        Ok(Self {
            host: store.get_str(KEY_BROKER)?.unwrap_or(defaults.host),
            port,
            username: store.get_str(KEY_USER)?.unwrap_or_default(),
            password: store.get_str(KEY_PASS)?.unwrap_or_default(),
            use_tls: store.get_bool(KEY_USE_TLS)?.unwrap_or(false),
            telemetry_interval_ms,
        })
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> StoreResult<()> {
        store.put_str(KEY_BROKER, &self.host)?;
        store.put_i64(KEY_PORT, i64::from(self.port))?;
        store.put_str(KEY_USER, &self.username)?;
        store.put_str(KEY_PASS, &self.password)?;
        store.put_bool(KEY_USE_TLS, self.use_tls)?;
        store.put_i64(
            KEY_TELEMETRY_INTERVAL,
            i64::try_from(self.telemetry_interval_ms).unwrap_or(i64::MAX),
        )?;
        Ok(())
    }

    pub fn sanitize(&mut self) {
        self.host = self.host.trim().to_string();
        if self.telemetry_interval_ms == 0 {
            self.telemetry_interval_ms = DEFAULT_TELEMETRY_INTERVAL_MS;
        }
        if self.port == 0 {
            self.port = DEFAULT_BROKER_PORT;
        }
    }

    /// The session may only be attempted against a configured address.
    pub fn is_connectable(&self) -> bool {
        !self.host.is_empty()
    }
}

/// Linear correction for one analog channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCalibration {
    pub offset: f32,
    pub scale: f32,
}

impl Default for ChannelCalibration {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: 1.0,
        }
    }
}

impl ChannelCalibration {
    fn sanitize(&mut self) {
        if !self.scale.is_finite() || self.scale == 0.0 {
            self.scale = 1.0;
        }
        if !self.offset.is_finite() {
            self.offset = 0.0;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationProfile {
    pub ph: ChannelCalibration,
    pub temperature: ChannelCalibration,
    pub orp: ChannelCalibration,
}

impl CalibrationProfile {
    pub fn load(store: &dyn KeyValueStore) -> StoreResult<Self> {
        let channel = |offset_key: &str, scale_key: &str| -> StoreResult<ChannelCalibration> {
            Ok(ChannelCalibration {
                offset: store.get_f32(offset_key)?.unwrap_or(0.0),
                scale: store.get_f32(scale_key)?.unwrap_or(1.0),
            })
        };

        Ok(Self {
            ph: channel(KEY_PH_OFFSET, KEY_PH_SCALE)?,
            temperature: channel(KEY_TEMP_OFFSET, KEY_TEMP_SCALE)?,
            orp: channel(KEY_ORP_OFFSET, KEY_ORP_SCALE)?,
        })
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> StoreResult<()> {
        store.put_f32(KEY_PH_OFFSET, self.ph.offset)?;
        store.put_f32(KEY_PH_SCALE, self.ph.scale)?;
        store.put_f32(KEY_TEMP_OFFSET, self.temperature.offset)?;
        store.put_f32(KEY_TEMP_SCALE, self.temperature.scale)?;
        store.put_f32(KEY_ORP_OFFSET, self.orp.offset)?;
        store.put_f32(KEY_ORP_SCALE, self.orp.scale)?;
        Ok(())
    }

    /// A zero or non-finite scale would make calibrated channels
    /// unrecoverable; restore the identity mapping instead.
    pub fn sanitize(&mut self) {
        self.ph.sanitize();
        self.temperature.sanitize();
        self.orp.sanitize();
    }
}
