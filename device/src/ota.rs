use anyhow::{anyhow, bail, Context};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    flash::{FirmwareFlash, UPDATE_SAFETY_MARGIN},
    platform::SystemCtl,
    update::UpdateTransport,
};

pub const UPDATE_CHECK_PATH: &str = "/api/v1/iot/firmware/check";
pub const UPDATE_CHECK_INTERVAL_MS: u64 = 3_600_000;

const DOWNLOAD_CHUNK_BYTES: usize = 4096;

/// Rate-limited firmware version polling plus the transactional
/// download-and-flash procedure. A failed transfer keeps the running image
/// and leaves no partial state; the next scheduled or forced check retries
/// from scratch.
pub struct OtaUpdater {
    server_url: Option<String>,
    current_version: String,
    device_id: String,
    check_interval_ms: u64,
    last_check_ms: u64,
}

impl OtaUpdater {
    pub fn new(server_url: Option<String>, device_id: String, current_version: String) -> Self {
        Self {
            server_url,
            current_version,
            device_id,
            check_interval_ms: UPDATE_CHECK_INTERVAL_MS,
            last_check_ms: 0,
        }
    }

    /// The fleet backend fronts both the broker and the update API.
    pub fn server_url_from_broker(host: &str) -> Option<String> {
        let host = host.trim();
        (!host.is_empty()).then(|| format!("http://{host}"))
    }

    /// Polls the update server once the check interval has elapsed. A
    /// well-formed response advertising an update triggers the download
    /// and flash immediately.
    pub fn check_for_update(
        &mut self,
        now_ms: u64,
        transport: &mut dyn UpdateTransport,
        flash: &mut dyn FirmwareFlash,
        sysctl: &mut dyn SystemCtl,
    ) -> bool {
        let Some(server) = self.server_url.clone() else {
            return false;
        };
        if now_ms.saturating_sub(self.last_check_ms) < self.check_interval_ms {
            return false;
        }
        self.last_check_ms = now_ms;

        let url = format!(
            "{server}{UPDATE_CHECK_PATH}?version={}&device={}",
            self.current_version, self.device_id
        );
        let response = match transport.check_version(&url) {
            Ok(response) => response,
            Err(err) => {
                warn!("firmware version check failed: {err:#}");
                return false;
            }
        };

        if !response.update_available {
            return false;
        }
        if response.firmware_url.is_empty() {
            warn!("update advertised without a firmware url");
            return false;
        }

        info!(version = %response.version, "firmware update available");
        self.perform_update(&response.firmware_url, transport, flash, sysctl)
    }

    /// Operator-issued immediate update; skips the staleness gate.
    pub fn force_update(
        &mut self,
        url: &str,
        transport: &mut dyn UpdateTransport,
        flash: &mut dyn FirmwareFlash,
        sysctl: &mut dyn SystemCtl,
    ) -> bool {
        self.perform_update(url, transport, flash, sysctl)
    }

    pub fn perform_update(
        &mut self,
        url: &str,
        transport: &mut dyn UpdateTransport,
        flash: &mut dyn FirmwareFlash,
        sysctl: &mut dyn SystemCtl,
    ) -> bool {
        info!(url, "starting firmware update");

        match stage_firmware(url, transport, flash) {
            Ok(staged) => {
                info!(
                    bytes = staged.bytes,
                    sha256 = %staged.digest,
                    "firmware staged; committing and restarting"
                );
                sysctl.restart();
                true
            }
            Err(err) => {
                warn!("firmware update failed, running image untouched: {err:#}");
                false
            }
        }
    }
}

struct StagedImage {
    bytes: u64,
    digest: String,
}

fn stage_firmware(
    url: &str,
    transport: &mut dyn UpdateTransport,
    flash: &mut dyn FirmwareFlash,
) -> anyhow::Result<StagedImage> {
    let mut download = transport.open_firmware(url)?;

    let declared = download
        .content_length()
        .ok_or_else(|| anyhow!("download is missing a content length"))?;
    if declared == 0 {
        bail!("download declared a zero content length");
    }

    let usable = flash.available_space().saturating_sub(UPDATE_SAFETY_MARGIN);
    if declared > usable {
        bail!("image of {declared} bytes exceeds the {usable} bytes available");
    }

    let mut transaction = flash.begin(declared)?;
    let mut hasher = Sha256::new();
    let mut written = 0_u64;
    let mut chunk = [0_u8; DOWNLOAD_CHUNK_BYTES];

    loop {
        let read = match download.read_chunk(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) => {
                transaction.abort();
                return Err(err.context("download interrupted"));
            }
        };

        if let Err(err) = transaction.write(&chunk[..read]) {
            transaction.abort();
            return Err(err.context("staged write failed"));
        }
        hasher.update(&chunk[..read]);
        written = written.saturating_add(read as u64);

        if written > declared {
            transaction.abort();
            bail!("download exceeded the declared length of {declared} bytes");
        }
    }

    if written != declared {
        transaction.abort();
        bail!("wrote {written} of {declared} declared bytes");
    }

    transaction
        .finalize()
        .context("failed to finalize the staged image")?;

    let digest = hasher.finalize();
    let mut digest_hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write as _;
        let _ = write!(&mut digest_hex, "{byte:02x}");
    }

    Ok(StagedImage {
        bytes: written,
        digest: digest_hex,
    })
}
