use std::collections::HashMap;

use serde_json::Value;
use tracing::{info, warn};

use aquanode_common::{
    store::KeyValueStore,
    topics::{self, InboundKind},
    types::{CommandEnvelope, CommandResponse, ConfigEnvelope},
    BrokerConfig, DeviceIdentity, SensorEngine,
};

use crate::{
    channel::MessageChannel, flash::FirmwareFlash, ota::OtaUpdater, platform::SystemCtl,
    update::UpdateTransport,
};

const DEFAULT_PH_TARGET: f32 = 7.2;

/// Everything a command handler may touch, borrowed from the runtime for
/// the duration of one message. Inbound dispatch runs on the control loop
/// itself, so the access is exclusive by construction.
pub struct DispatchCtx<'a> {
    pub engine: &'a mut SensorEngine,
    pub ota: &'a mut OtaUpdater,
    pub config: &'a mut BrokerConfig,
    pub device_store: &'a mut dyn KeyValueStore,
    pub channel: &'a mut dyn MessageChannel,
    pub transport: &'a mut dyn UpdateTransport,
    pub flash: &'a mut dyn FirmwareFlash,
    pub sysctl: &'a mut dyn SystemCtl,
    pub identity: &'a DeviceIdentity,
}

/// Routes inbound messages from the `commands` and `config` topics and
/// acknowledges every dispatched command with exactly one response.
pub struct CommandDispatcher {
    ph_target: f32,
    pump_states: HashMap<i64, bool>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self {
            ph_target: DEFAULT_PH_TARGET,
            pump_states: HashMap::new(),
        }
    }

    pub fn ph_target(&self) -> f32 {
        self.ph_target
    }

    pub fn pump_state(&self, pump_id: i64) -> Option<bool> {
        self.pump_states.get(&pump_id).copied()
    }

    pub fn on_message(&mut self, topic: &str, payload: &[u8], ctx: &mut DispatchCtx<'_>) {
        let Some(kind) = topics::parse_inbound(topic) else {
            return;
        };

        match kind {
            InboundKind::Commands => self.handle_command(payload, ctx),
            InboundKind::Config => self.handle_config(payload, ctx),
        }
    }

    fn handle_command(&mut self, payload: &[u8], ctx: &mut DispatchCtx<'_>) {
        let envelope: CommandEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                // No ack for malformed payloads; the sender times out and
                // retries.
                warn!("malformed command payload dropped: {err}");
                return;
            }
        };
        info!(
            command = %envelope.command,
            command_id = %envelope.command_id,
            "command received"
        );

        if envelope.command == "reboot" {
            // The ack must be on the wire before the restart.
            send_response(ctx, &envelope.command_id, true);
            ctx.sysctl.restart();
            return;
        }

        let success = self.execute(&envelope, ctx);
        send_response(ctx, &envelope.command_id, success);
    }

    fn execute(&mut self, envelope: &CommandEnvelope, ctx: &mut DispatchCtx<'_>) -> bool {
        let params = &envelope.parameters;

        match envelope.command.as_str() {
            "set_pump" => {
                let pump_id = params.get("pump_id").and_then(Value::as_i64).unwrap_or(1);
                let on = params
                    .get("state")
                    .and_then(Value::as_str)
                    .map(|state| state.eq_ignore_ascii_case("on"))
                    .unwrap_or(false);
                self.pump_states.insert(pump_id, on);
                // Relay actuation is the hardware integration point.
                info!(pump_id, on, "pump state updated");
                true
            }
            "set_ph_target" => {
                let target = params
                    .get("target_ph")
                    .and_then(Value::as_f64)
                    .unwrap_or(7.0) as f32;
                self.ph_target = target;
                info!(target, "pH dosing target updated");
                true
            }
            "calibrate_sensor" => {
                let sensor_type = params
                    .get("sensor_type")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let known = params.get("value").and_then(Value::as_f64).unwrap_or(0.0) as f32;
                let measured = params
                    .get("measured")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0) as f32;

                let result = match sensor_type {
                    "ph" => ctx.engine.calibrate_ph(known, measured),
                    "temperature" => ctx.engine.calibrate_temperature(known, measured),
                    other => {
                        warn!(sensor_type = other, "unsupported calibration target");
                        return false;
                    }
                };

                match result {
                    Ok(()) => true,
                    Err(err) => {
                        warn!("calibration persistence failed: {err}");
                        false
                    }
                }
            }
            "update_firmware" => {
                let url = params
                    .get("firmware_url")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                if url.is_empty() {
                    warn!("update_firmware without a firmware_url");
                    false
                } else {
                    ctx.ota.force_update(url, ctx.transport, ctx.flash, ctx.sysctl)
                }
            }
            other => {
                warn!(command = other, "unknown command");
                false
            }
        }
    }

    fn handle_config(&mut self, payload: &[u8], ctx: &mut DispatchCtx<'_>) {
        let envelope: ConfigEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!("malformed config payload dropped: {err}");
                return;
            }
        };

        if let Some(interval) = envelope.config.telemetry_interval {
            match u64::try_from(interval) {
                Ok(interval_ms) if interval_ms > 0 => {
                    ctx.config.telemetry_interval_ms = interval_ms;
                    if let Err(err) = ctx.config.save(ctx.device_store) {
                        warn!("failed to persist telemetry interval: {err}");
                    } else {
                        info!(interval_ms, "telemetry interval updated");
                    }
                }
                _ => warn!(interval, "ignoring non-positive telemetry interval"),
            }
        }
    }
}

fn send_response(ctx: &mut DispatchCtx<'_>, command_id: &str, success: bool) {
    let response = CommandResponse {
        command_id: command_id.to_string(),
        success,
        timestamp: chrono::Utc::now().timestamp(),
    };
    let topic =
        topics::command_response_topic(&ctx.identity.organization_id, &ctx.identity.device_id);

    match serde_json::to_vec(&response) {
        Ok(body) => {
            if let Err(err) = ctx.channel.publish(&topic, &body) {
                warn!("command response publish failed: {err:#}");
            }
        }
        Err(err) => warn!("command response serialization failed: {err}"),
    }
}
