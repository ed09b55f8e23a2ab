use sha2::{Digest, Sha256};
use tracing::info;

pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform odds and ends: the hardware-unique value the device id is
/// derived from, the battery gauge, and the reboot primitive.
pub trait SystemCtl {
    fn unique_id(&self) -> u64;
    fn battery_percent(&self) -> u8;
    fn restart(&mut self);
}

pub struct HostSystem;

impl HostSystem {
    pub fn new() -> Self {
        Self
    }
}

impl SystemCtl for HostSystem {
    fn unique_id(&self) -> u64 {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "aquanode-host".to_string());
        let digest = Sha256::digest(host.as_bytes());
        let mut bytes = [0_u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }

    fn battery_percent(&self) -> u8 {
        // Battery gauge integration point; a mains-powered host reports a
        // fixed level.
        85
    }

    fn restart(&mut self) {
        info!("device restart requested; exiting host process");
        std::process::exit(0);
    }
}
