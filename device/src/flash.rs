use std::{fs, io::Write, path::PathBuf};

use anyhow::Context;

/// Headroom kept free when sizing an incoming image against the update
/// slot.
pub const UPDATE_SAFETY_MARGIN: u64 = 0x1000;

const DEFAULT_CAPACITY_BYTES: u64 = 4 * 1024 * 1024;
const STAGING_NAME: &str = "firmware.bin.staging";
const IMAGE_NAME: &str = "firmware.bin";

/// One staged firmware write. Nothing is visible to the boot path until
/// `finalize` succeeds; `abort` (or a failed finalize) leaves the running
/// image untouched.
pub trait FirmwareTransaction {
    fn write(&mut self, chunk: &[u8]) -> anyhow::Result<()>;
    fn finalize(self: Box<Self>) -> anyhow::Result<()>;
    fn abort(self: Box<Self>);
}

pub trait FirmwareFlash {
    fn available_space(&self) -> u64;
    fn begin(&mut self, declared_len: u64) -> anyhow::Result<Box<dyn FirmwareTransaction>>;
}

/// Host stand-in for the flash update slot: the image is staged to a file
/// and swapped into place on finalize.
pub struct StagedFirmwareFile {
    dir: PathBuf,
    capacity: u64,
}

impl StagedFirmwareFile {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            capacity: DEFAULT_CAPACITY_BYTES,
        }
    }
}

impl FirmwareFlash for StagedFirmwareFile {
    fn available_space(&self) -> u64 {
        self.capacity
    }

    fn begin(&mut self, _declared_len: u64) -> anyhow::Result<Box<dyn FirmwareTransaction>> {
        fs::create_dir_all(&self.dir).context("failed to create the update directory")?;
        let staging = self.dir.join(STAGING_NAME);
        let file = fs::File::create(&staging).context("failed to create the staging image")?;

        Ok(Box::new(StagedTransaction {
            file,
            staging,
            target: self.dir.join(IMAGE_NAME),
        }))
    }
}

struct StagedTransaction {
    file: fs::File,
    staging: PathBuf,
    target: PathBuf,
}

impl FirmwareTransaction for StagedTransaction {
    fn write(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        self.file
            .write_all(chunk)
            .context("staged image write failed")
    }

    fn finalize(self: Box<Self>) -> anyhow::Result<()> {
        let Self {
            mut file,
            staging,
            target,
        } = *self;

        let flushed = file.flush().and_then(|_| file.sync_all());
        drop(file);

        match flushed.and_then(|_| fs::rename(&staging, &target)) {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&staging);
                Err(err).context("failed to commit the staged image")
            }
        }
    }

    fn abort(self: Box<Self>) {
        let Self { file, staging, .. } = *self;
        drop(file);
        let _ = fs::remove_file(staging);
    }
}
