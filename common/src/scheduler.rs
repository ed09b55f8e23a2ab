/// Fixed cadence for device status reports.
pub const STATUS_INTERVAL_MS: u64 = 60_000;

/// Elapsed-time gates for the periodic publishes, evaluated once per
/// control-loop tick. The caller marks a gate only after a successful
/// publish attempt, so a failed publish retries on the next tick without
/// shifting the cadence.
#[derive(Debug, Default)]
pub struct TelemetryScheduler {
    last_telemetry_ms: u64,
    last_status_ms: u64,
}

impl TelemetryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn due_for_telemetry(&self, now_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_telemetry_ms) >= interval_ms
    }

    pub fn due_for_status(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_status_ms) >= STATUS_INTERVAL_MS
    }

    pub fn mark_telemetry_sent(&mut self, now_ms: u64) {
        self.last_telemetry_ms = now_ms;
    }

    pub fn mark_status_sent(&mut self, now_ms: u64) {
        self.last_status_ms = now_ms;
    }
}
