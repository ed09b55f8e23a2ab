use std::{io::Read, time::Duration};

use anyhow::{anyhow, Context};

use aquanode_common::VersionCheckResponse;

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// An open firmware download stream.
pub trait FirmwareDownload {
    fn content_length(&self) -> Option<u64>;
    fn read_chunk(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;
}

/// Transport to the update server: version polling and image retrieval.
pub trait UpdateTransport {
    fn check_version(&mut self, url: &str) -> anyhow::Result<VersionCheckResponse>;
    fn open_firmware(&mut self, url: &str) -> anyhow::Result<Box<dyn FirmwareDownload>>;
}

pub struct HttpUpdateTransport {
    check_client: reqwest::blocking::Client,
    download_client: reqwest::blocking::Client,
}

impl HttpUpdateTransport {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            check_client: reqwest::blocking::Client::builder()
                .timeout(VERSION_CHECK_TIMEOUT)
                .build()
                .context("failed to build the version-check client")?,
            download_client: reqwest::blocking::Client::builder()
                .timeout(DOWNLOAD_TIMEOUT)
                .build()
                .context("failed to build the download client")?,
        })
    }
}

impl UpdateTransport for HttpUpdateTransport {
    fn check_version(&mut self, url: &str) -> anyhow::Result<VersionCheckResponse> {
        let response = self
            .check_client
            .get(url)
            .send()
            .context("version check request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("version check returned HTTP {status}"));
        }

        response
            .json::<VersionCheckResponse>()
            .context("malformed version check response")
    }

    fn open_firmware(&mut self, url: &str) -> anyhow::Result<Box<dyn FirmwareDownload>> {
        let response = self
            .download_client
            .get(url)
            .send()
            .context("firmware download request failed")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("firmware download returned HTTP {status}"));
        }

        Ok(Box::new(HttpDownload {
            length: response.content_length(),
            response,
        }))
    }
}

struct HttpDownload {
    length: Option<u64>,
    response: reqwest::blocking::Response,
}

impl FirmwareDownload for HttpDownload {
    fn content_length(&self) -> Option<u64> {
        self.length
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        self.response
            .read(buf)
            .context("firmware stream read failed")
    }
}
