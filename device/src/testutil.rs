//! Recording test doubles for the capability seams.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

use anyhow::{anyhow, bail};

use aquanode_common::{
    store::{KeyValueStore, StoreResult},
    AdcChannel, AdcError, AdcReader, BrokerConfig, DeviceIdentity, MemoryStore,
    VersionCheckResponse,
};

use crate::{
    channel::{InboundMessage, MessageChannel},
    flash::{FirmwareFlash, FirmwareTransaction},
    net::NetworkLink,
    platform::SystemCtl,
    update::{FirmwareDownload, UpdateTransport},
};

/// Interleaved action log shared across doubles, for ordering assertions.
#[derive(Clone, Default)]
pub struct TestEvents(Rc<RefCell<Vec<String>>>);

impl TestEvents {
    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

#[derive(Default)]
pub struct ChannelState {
    pub connected: bool,
    pub fail_connects: u32,
    pub fail_publish: bool,
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>)>,
    pub inbound: VecDeque<InboundMessage>,
}

#[derive(Clone)]
pub struct SharedChannel {
    pub state: Rc<RefCell<ChannelState>>,
    events: TestEvents,
}

impl SharedChannel {
    pub fn new(events: TestEvents) -> Self {
        Self {
            state: Rc::new(RefCell::new(ChannelState::default())),
            events,
        }
    }

    pub fn push_inbound(&self, topic: String, payload: Vec<u8>) {
        self.state
            .borrow_mut()
            .inbound
            .push_back(InboundMessage { topic, payload });
    }

    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.state
            .borrow()
            .published
            .iter()
            .filter(|(published_topic, _)| published_topic == topic)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

impl MessageChannel for SharedChannel {
    fn connect(&mut self, _config: &BrokerConfig, _identity: &DeviceIdentity) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            bail!("simulated session failure");
        }
        state.connected = true;
        self.events.push("connect");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
        self.events.push("disconnect");
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn subscribe(&mut self, topic: &str) -> anyhow::Result<()> {
        self.state.borrow_mut().subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_publish {
            bail!("simulated publish failure");
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        self.events.push(format!("publish:{topic}"));
        Ok(())
    }

    fn poll(&mut self) -> Vec<InboundMessage> {
        self.state.borrow_mut().inbound.drain(..).collect()
    }
}

#[derive(Clone)]
pub struct SharedNet {
    pub connected: Rc<Cell<bool>>,
}

impl SharedNet {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: Rc::new(Cell::new(connected)),
        }
    }
}

impl NetworkLink for SharedNet {
    fn begin_association(&mut self) {}

    fn is_connected(&mut self) -> bool {
        self.connected.get()
    }

    fn signal_strength_dbm(&mut self) -> i32 {
        -55
    }
}

#[derive(Default)]
pub struct SysctlState {
    pub restarts: u32,
}

#[derive(Clone)]
pub struct SharedSysctl {
    pub state: Rc<RefCell<SysctlState>>,
    events: TestEvents,
}

impl SharedSysctl {
    pub fn new(events: TestEvents) -> Self {
        Self {
            state: Rc::new(RefCell::new(SysctlState::default())),
            events,
        }
    }
}

impl SystemCtl for SharedSysctl {
    fn unique_id(&self) -> u64 {
        0x00c0_ffee
    }

    fn battery_percent(&self) -> u8 {
        85
    }

    fn restart(&mut self) {
        self.state.borrow_mut().restarts += 1;
        self.events.push("restart");
    }
}

#[derive(Default)]
pub struct TransportState {
    pub version_response: Option<VersionCheckResponse>,
    pub firmware: Vec<u8>,
    /// Overrides the declared content length; defaults to the real length.
    pub declared_length: Option<Option<u64>>,
    pub fail_read_after: Option<usize>,
    pub check_urls: Vec<String>,
    pub open_calls: u32,
}

#[derive(Clone, Default)]
pub struct SharedTransport(pub Rc<RefCell<TransportState>>);

impl UpdateTransport for SharedTransport {
    fn check_version(&mut self, url: &str) -> anyhow::Result<VersionCheckResponse> {
        let mut state = self.0.borrow_mut();
        state.check_urls.push(url.to_string());
        state
            .version_response
            .clone()
            .ok_or_else(|| anyhow!("simulated version check failure"))
    }

    fn open_firmware(&mut self, _url: &str) -> anyhow::Result<Box<dyn FirmwareDownload>> {
        let mut state = self.0.borrow_mut();
        state.open_calls += 1;
        let declared = state
            .declared_length
            .unwrap_or(Some(state.firmware.len() as u64));
        Ok(Box::new(VecDownload {
            data: state.firmware.clone(),
            pos: 0,
            declared,
            fail_after: state.fail_read_after,
        }))
    }
}

struct VecDownload {
    data: Vec<u8>,
    pos: usize,
    declared: Option<u64>,
    fail_after: Option<usize>,
}

impl FirmwareDownload for VecDownload {
    fn content_length(&self) -> Option<u64> {
        self.declared
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        if let Some(limit) = self.fail_after {
            if self.pos >= limit {
                bail!("simulated stream failure");
            }
        }

        let remaining = &self.data[self.pos.min(self.data.len())..];
        let mut take = remaining.len().min(buf.len());
        if let Some(limit) = self.fail_after {
            take = take.min(limit - self.pos);
        }
        buf[..take].copy_from_slice(&remaining[..take]);
        self.pos += take;
        Ok(take)
    }
}

#[derive(Default)]
pub struct FlashState {
    pub capacity: u64,
    pub begins: u32,
    pub written: Vec<u8>,
    pub finalized: u32,
    pub aborted: u32,
    pub fail_finalize: bool,
}

#[derive(Clone)]
pub struct SharedFlash(pub Rc<RefCell<FlashState>>);

impl SharedFlash {
    pub fn with_capacity(capacity: u64) -> Self {
        Self(Rc::new(RefCell::new(FlashState {
            capacity,
            ..FlashState::default()
        })))
    }
}

impl FirmwareFlash for SharedFlash {
    fn available_space(&self) -> u64 {
        self.0.borrow().capacity
    }

    fn begin(&mut self, _declared_len: u64) -> anyhow::Result<Box<dyn FirmwareTransaction>> {
        self.0.borrow_mut().begins += 1;
        Ok(Box::new(SharedTransaction(self.0.clone())))
    }
}

struct SharedTransaction(Rc<RefCell<FlashState>>);

impl FirmwareTransaction for SharedTransaction {
    fn write(&mut self, chunk: &[u8]) -> anyhow::Result<()> {
        self.0.borrow_mut().written.extend_from_slice(chunk);
        Ok(())
    }

    fn finalize(self: Box<Self>) -> anyhow::Result<()> {
        let mut state = self.0.borrow_mut();
        if state.fail_finalize {
            state.aborted += 1;
            bail!("simulated finalize failure");
        }
        state.finalized += 1;
        Ok(())
    }

    fn abort(self: Box<Self>) {
        self.0.borrow_mut().aborted += 1;
    }
}

#[derive(Clone, Default)]
pub struct SharedKvStore(pub Rc<RefCell<MemoryStore>>);

impl KeyValueStore for SharedKvStore {
    fn get_str(&self, key: &str) -> StoreResult<Option<String>> {
        self.0.borrow().get_str(key)
    }
    fn put_str(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.0.borrow_mut().put_str(key, value)
    }
    fn get_i64(&self, key: &str) -> StoreResult<Option<i64>> {
        self.0.borrow().get_i64(key)
    }
    fn put_i64(&mut self, key: &str, value: i64) -> StoreResult<()> {
        self.0.borrow_mut().put_i64(key, value)
    }
    fn get_bool(&self, key: &str) -> StoreResult<Option<bool>> {
        self.0.borrow().get_bool(key)
    }
    fn put_bool(&mut self, key: &str, value: bool) -> StoreResult<()> {
        self.0.borrow_mut().put_bool(key, value)
    }
    fn get_f32(&self, key: &str) -> StoreResult<Option<f32>> {
        self.0.borrow().get_f32(key)
    }
    fn put_f32(&mut self, key: &str, value: f32) -> StoreResult<()> {
        self.0.borrow_mut().put_f32(key, value)
    }
}

pub struct FixedAdc {
    pub ph: u16,
    pub temperature: u16,
    pub orp: u16,
}

impl Default for FixedAdc {
    fn default() -> Self {
        Self {
            ph: 1400,
            temperature: 1100,
            orp: 900,
        }
    }
}

impl AdcReader for FixedAdc {
    fn read(&mut self, channel: AdcChannel) -> Result<u16, AdcError> {
        Ok(match channel {
            AdcChannel::Ph => self.ph,
            AdcChannel::Temperature => self.temperature,
            AdcChannel::Orp => self.orp,
        })
    }
}

pub fn test_identity() -> DeviceIdentity {
    DeviceIdentity {
        device_id: "dev1".to_string(),
        organization_id: "org1".to_string(),
    }
}

pub fn test_config() -> BrokerConfig {
    BrokerConfig {
        host: "broker.test".to_string(),
        ..BrokerConfig::default()
    }
}
