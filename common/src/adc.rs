use thiserror::Error;

/// Analog channels wired to the controller board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdcChannel {
    Ph,
    Temperature,
    Orp,
}

impl AdcChannel {
    /// Board GPIO carrying the channel.
    pub fn gpio(self) -> u8 {
        match self {
            Self::Ph => 34,
            Self::Temperature => 35,
            Self::Orp => 32,
        }
    }
}

/// 12-bit converter with a 3.3 V reference.
pub const ADC_MAX_COUNTS: u16 = 4095;
pub const ADC_REFERENCE_VOLTS: f32 = 3.3;

#[derive(Debug, Error)]
#[error("adc read failed on channel {channel:?} (gpio {})", .channel.gpio())]
pub struct AdcError {
    pub channel: AdcChannel,
}

/// Raw acquisition primitive: one integer sample per channel.
pub trait AdcReader {
    fn read(&mut self, channel: AdcChannel) -> Result<u16, AdcError>;
}
