use aquanode_common::{AdcChannel, AdcError, AdcReader};

/// Deterministic channel waveforms standing in for the analog front end.
/// Hardware integration point: replace with the board's ADC driver.
pub struct SimulatedAdc {
    tick: u64,
}

impl SimulatedAdc {
    pub fn new() -> Self {
        Self { tick: 0 }
    }
}

impl AdcReader for SimulatedAdc {
    fn read(&mut self, channel: AdcChannel) -> Result<u16, AdcError> {
        self.tick = self.tick.wrapping_add(1);
        let wobble = ((self.tick % 16) as u16) * 16;

        Ok(match channel {
            AdcChannel::Ph => 1400 + wobble,
            AdcChannel::Temperature => 1100 + wobble,
            AdcChannel::Orp => 840 + wobble,
        })
    }
}
