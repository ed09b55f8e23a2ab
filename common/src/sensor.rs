use tracing::warn;

use crate::{
    adc::{AdcChannel, AdcError, AdcReader, ADC_MAX_COUNTS, ADC_REFERENCE_VOLTS},
    config::CalibrationProfile,
    store::{KeyValueStore, StoreResult},
};

const PH_MIN: f32 = 0.0;
const PH_MAX: f32 = 14.0;
const TEMPERATURE_MIN_C: f32 = -10.0;
const TEMPERATURE_MAX_C: f32 = 50.0;
const ORP_MIN_MV: f32 = -1000.0;
const ORP_MAX_MV: f32 = 1000.0;
const CHLORINE_MIN_PPM: f32 = 0.0;
const CHLORINE_MAX_PPM: f32 = 10.0;

const ORP_MILLIVOLTS_PER_VOLT: f32 = 1000.0;
// Chlorine is approximated from ORP with a fixed linear mapping.
const CHLORINE_ORP_BASELINE_MV: f32 = 650.0;
const CHLORINE_MV_PER_PPM: f32 = 50.0;

const READ_INTERVAL_MS: u64 = 1_000;

const STUCK_PH_TOLERANCE: f32 = 0.01;
const STUCK_TEMPERATURE_TOLERANCE: f32 = 0.1;
const STUCK_CALL_LIMIT: u32 = 10;

/// One calibrated snapshot of all channels. `timestamp_ms` is monotonic
/// loop time, not wall clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub ph: f32,
    pub temperature: f32,
    pub orp: f32,
    pub chlorine: f32,
    pub timestamp_ms: u64,
}

/// Acquisition, calibration, and failure detection for the water-chemistry
/// channels. Owns the calibration profile and the last valid reading;
/// validation failures fall back to that cache and are never fatal.
pub struct SensorEngine {
    adc: Box<dyn AdcReader>,
    store: Box<dyn KeyValueStore>,
    calibration: CalibrationProfile,
    read_interval_ms: u64,
    last_read_ms: Option<u64>,
    cached: Option<SensorReading>,

    previous_ph: Option<f32>,
    previous_temperature: Option<f32>,
    stuck_count: u32,
}

impl SensorEngine {
    pub fn new(adc: Box<dyn AdcReader>, store: Box<dyn KeyValueStore>) -> StoreResult<Self> {
        let mut calibration = CalibrationProfile::load(store.as_ref())?;
        calibration.sanitize();

        Ok(Self {
            adc,
            store,
            calibration,
            read_interval_ms: READ_INTERVAL_MS,
            last_read_ms: None,
            cached: None,
            previous_ph: None,
            previous_temperature: None,
            stuck_count: 0,
        })
    }

    pub fn calibration(&self) -> &CalibrationProfile {
        &self.calibration
    }

    /// Maps one raw sample to volts using the converter's reference range.
    pub fn read_channel(&mut self, channel: AdcChannel) -> Result<f32, AdcError> {
        let raw = self.adc.read(channel)?.min(ADC_MAX_COUNTS);
        Ok(f32::from(raw) / f32::from(ADC_MAX_COUNTS) * ADC_REFERENCE_VOLTS)
    }

    pub fn read_ph(&mut self) -> Result<f32, AdcError> {
        let volts = self.read_channel(AdcChannel::Ph)?;
        let cal = self.calibration.ph;
        Ok(((volts - cal.offset) * cal.scale).clamp(PH_MIN, PH_MAX))
    }

    pub fn read_temperature(&mut self) -> Result<f32, AdcError> {
        let volts = self.read_channel(AdcChannel::Temperature)?;
        let cal = self.calibration.temperature;
        Ok((volts - cal.offset) * cal.scale)
    }

    /// Oxidation-reduction potential in millivolts.
    pub fn read_orp(&mut self) -> Result<f32, AdcError> {
        let volts = self.read_channel(AdcChannel::Orp)?;
        let cal = self.calibration.orp;
        Ok((volts - cal.offset) * cal.scale * ORP_MILLIVOLTS_PER_VOLT)
    }

    /// Free-chlorine estimate in ppm, derived from ORP rather than sensed.
    pub fn read_chlorine(&mut self) -> Result<f32, AdcError> {
        let orp = self.read_orp()?;
        Ok(chlorine_from_orp(orp))
    }

    /// Acquires a full snapshot, rate-limited to one hardware read per
    /// second. Early calls, acquisition errors, and validation failures
    /// all return the cached reading (`None` until one has passed
    /// validation).
    pub fn read_all(&mut self, now_ms: u64) -> Option<SensorReading> {
        if let Some(last) = self.last_read_ms {
            if now_ms.saturating_sub(last) < self.read_interval_ms {
                return self.cached;
            }
        }

        let fresh = match self.acquire(now_ms) {
            Ok(reading) => reading,
            Err(err) => {
                warn!("sensor acquisition failed, serving cached reading: {err}");
                return self.cached;
            }
        };

        if !Self::validate_readings(&fresh) {
            return self.cached;
        }

        self.cached = Some(fresh);
        self.last_read_ms = Some(now_ms);
        self.cached
    }

    /// Range checks over one snapshot; violations are logged.
    pub fn validate_readings(reading: &SensorReading) -> bool {
        if !(PH_MIN..=PH_MAX).contains(&reading.ph) {
            warn!(ph = reading.ph, "invalid pH reading");
            return false;
        }
        if !(TEMPERATURE_MIN_C..=TEMPERATURE_MAX_C).contains(&reading.temperature) {
            warn!(temperature = reading.temperature, "invalid temperature reading");
            return false;
        }
        if !(ORP_MIN_MV..=ORP_MAX_MV).contains(&reading.orp) {
            warn!(orp = reading.orp, "invalid ORP reading");
            return false;
        }
        if !(CHLORINE_MIN_PPM..=CHLORINE_MAX_PPM).contains(&reading.chlorine) {
            warn!(chlorine = reading.chlorine, "invalid chlorine reading");
            return false;
        }
        true
    }

    /// Single-pair pH calibration, persisted immediately.
    ///
    /// The offset is computed with the pre-update scale and the scale with
    /// the post-update offset, both from the same sample. That mutual
    /// reference is the documented contract inherited from the deployed
    /// fleet; see DESIGN.md before changing it.
    pub fn calibrate_ph(&mut self, known_ph: f32, measured_value: f32) -> StoreResult<()> {
        let cal = &mut self.calibration.ph;
        cal.offset = measured_value - known_ph / cal.scale;
        cal.scale = known_ph / (measured_value - cal.offset);
        self.persist_calibration()
    }

    /// Single-pair temperature calibration; same formula as pH.
    pub fn calibrate_temperature(
        &mut self,
        known_temperature: f32,
        measured_value: f32,
    ) -> StoreResult<()> {
        let cal = &mut self.calibration.temperature;
        cal.offset = measured_value - known_temperature / cal.scale;
        cal.scale = known_temperature / (measured_value - cal.offset);
        self.persist_calibration()
    }

    fn persist_calibration(&mut self) -> StoreResult<()> {
        self.calibration.sanitize();
        self.calibration.save(self.store.as_mut())
    }

    /// Stuck-sensor check across successive snapshots: both pH and
    /// temperature staying within tolerance of the previous reading for
    /// more than `STUCK_CALL_LIMIT` consecutive calls declares the sensor
    /// stuck. Any larger movement resets the counter.
    pub fn detect_failure(&mut self, now_ms: u64) -> bool {
        let Some(reading) = self.read_all(now_ms) else {
            return false;
        };

        let near_duplicate = match (self.previous_ph, self.previous_temperature) {
            (Some(ph), Some(temperature)) => {
                (reading.ph - ph).abs() < STUCK_PH_TOLERANCE
                    && (reading.temperature - temperature).abs() < STUCK_TEMPERATURE_TOLERANCE
            }
            _ => false,
        };

        if near_duplicate {
            self.stuck_count = self.stuck_count.saturating_add(1);
        } else {
            self.stuck_count = 0;
        }

        self.previous_ph = Some(reading.ph);
        self.previous_temperature = Some(reading.temperature);

        self.stuck_count > STUCK_CALL_LIMIT
    }

    fn acquire(&mut self, now_ms: u64) -> Result<SensorReading, AdcError> {
        let ph = self.read_ph()?;
        let temperature = self.read_temperature()?;
        let orp = self.read_orp()?;

        Ok(SensorReading {
            ph,
            temperature,
            orp,
            chlorine: chlorine_from_orp(orp),
            timestamp_ms: now_ms,
        })
    }
}

fn chlorine_from_orp(orp_mv: f32) -> f32 {
    ((orp_mv - CHLORINE_ORP_BASELINE_MV) / CHLORINE_MV_PER_PPM)
        .clamp(CHLORINE_MIN_PPM, CHLORINE_MAX_PPM)
}
