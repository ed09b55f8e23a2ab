pub mod adc;
pub mod config;
pub mod scheduler;
pub mod sensor;
pub mod store;
pub mod topics;
pub mod types;

pub use adc::{AdcChannel, AdcError, AdcReader};
pub use config::{BrokerConfig, CalibrationProfile, ChannelCalibration, DeviceIdentity};
pub use scheduler::{TelemetryScheduler, STATUS_INTERVAL_MS};
pub use sensor::{SensorEngine, SensorReading};
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use types::{
    AlertPayload, CommandEnvelope, CommandResponse, ConfigEnvelope, ConnectionState,
    SensorValues, StatusPayload, TelemetryMetadata, TelemetryPayload, VersionCheckResponse,
};
