use serde::{Deserialize, Serialize};

/// Connection lifecycle spanning network association and the messaging
/// session. Progression is monotonic; failures regress to `Disconnected`
/// (association lost) or `NetworkConnected` (session lost).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    NetworkConnecting,
    NetworkConnected,
    SessionConnecting,
    Ready,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::NetworkConnecting => "NETWORK_CONNECTING",
            Self::NetworkConnected => "NETWORK_CONNECTED",
            Self::SessionConnecting => "SESSION_CONNECTING",
            Self::Ready => "READY",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorValues {
    pub ph: f32,
    pub chlorine: f32,
    pub temperature: f32,
    pub orp: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryMetadata {
    pub battery: u8,
    pub signal_strength: i32,
    pub firmware_version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryPayload {
    pub device_id: String,
    pub organization_id: String,
    pub timestamp: i64,
    pub sensors: SensorValues,
    pub metadata: TelemetryMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub status: &'static str,
    pub battery: u8,
    pub signal_strength: i32,
    pub firmware_version: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub severity: &'static str,
    pub message: String,
    pub timestamp: i64,
}

/// Inbound command as decoded from the `commands` topic.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default)]
    pub command_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub command_id: String,
    pub success: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigUpdate {
    pub telemetry_interval: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigEnvelope {
    #[serde(default)]
    pub config: ConfigUpdate,
}

/// Update-server answer to a firmware version check.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VersionCheckResponse {
    #[serde(default)]
    pub update_available: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub firmware_url: String,
}
