/* Simulated receiver: a JSON-describable set of HID paths and paired */
/* keyboards that answers HID++ 2.0 Root and BACKLIGHT2 requests. */
/*  */
/* Used by the unit tests and, with the `dev-hooks` feature, by the CLI */
/* (`MX_KEYS_TEST_DEVICE=<file.json>`) to run against no hardware at all. */

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::config::{DEFAULT_RECEIVER_PID, DEFAULT_RECEIVER_VID};
use crate::device::{BACKLIGHT_CONFIG_LEN, BacklightConfig, BacklightState, EFFECT_NO_CHANGE};
use crate::driver::hidpp::{
    HIDPP20_ERROR, LONG_REPORT_LEN, PAGE_BACKLIGHT2, REPORT_ID_LONG, REPORT_ID_SHORT,
    ROOT_FEATURE_INDEX, ROOT_FN_GET_FEATURE,
};
use crate::driver::{HidBackend, ReportIo};
use crate::error::{Error, Result};

/* HID++ 2.0 error codes the simulation answers with */
const ERR_INVALID_ARGUMENT: u8 = 0x02;
const ERR_INVALID_FEATURE_INDEX: u8 = 0x06;
const ERR_INVALID_FUNCTION_ID: u8 = 0x07;

/* ------------------------------------------------------------------ */
/* JSON DTOs                                                            */
/* ------------------------------------------------------------------ */

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TestReceiverSpec {
    #[serde(default)]
    pub paths: Vec<TestPathSpec>,
    /* Make enumeration itself fail, like a missing udev. */
    #[serde(default)]
    pub enumeration_fails: bool,
}

impl TestReceiverSpec {
    /* One path with one paired keyboard. */
    pub fn single(path: &str, slot: TestSlotSpec) -> Self {
        Self {
            paths: vec![TestPathSpec::new(path, vec![slot])],
            enumeration_fails: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestPathSpec {
    pub path: String,
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    #[serde(default = "default_true")]
    pub openable: bool,
    #[serde(default)]
    pub slots: Vec<TestSlotSpec>,
}

impl TestPathSpec {
    /* An openable path with the default receiver identity. */
    pub fn new(path: &str, slots: Vec<TestSlotSpec>) -> Self {
        Self {
            path: path.to_string(),
            vendor_id: DEFAULT_RECEIVER_VID,
            product_id: DEFAULT_RECEIVER_PID,
            openable: true,
            slots,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TestSlotSpec {
    pub index: u8,
    pub feature_index: u8,
    #[serde(default, deserialize_with = "deserialize_state")]
    pub state: BacklightState,
    /* `None` answers getBacklightLevelRange with an error reply. */
    #[serde(default = "default_level_count")]
    pub level_count: Option<u8>,
    /* Acknowledge setBacklightConfig without changing the state. */
    #[serde(default)]
    pub ignore_writes: bool,
    /* Answer setBacklightConfig with enabled=0 with an error reply. */
    #[serde(default)]
    pub reject_off_writes: bool,
    /* Answer setBacklightConfig with enabled!=0 with an error reply. */
    #[serde(default)]
    pub reject_on_writes: bool,
    /* Answer getBacklightConfig with an error reply. */
    #[serde(default)]
    pub reject_reads: bool,
    /* Emit unrelated reports ahead of every reply. */
    #[serde(default)]
    pub noise: bool,
}

impl Default for TestSlotSpec {
    fn default() -> Self {
        Self {
            index: 1,
            feature_index: 1,
            state: BacklightState::default(),
            level_count: default_level_count(),
            ignore_writes: false,
            reject_off_writes: false,
            reject_on_writes: false,
            reject_reads: false,
            noise: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TestStateSpec {
    enabled: u8,
    options: u8,
    supported: u8,
    effects: u16,
    level: u8,
    dho: u16,
    dhi: u16,
    dpow: u16,
}

fn deserialize_state<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<BacklightState, D::Error> {
    let s = TestStateSpec::deserialize(de)?;
    Ok(BacklightState {
        enabled: s.enabled,
        options: s.options,
        supported: s.supported,
        effects: s.effects,
        level: s.level,
        dho: s.dho,
        dhi: s.dhi,
        dpow: s.dpow,
    })
}

fn default_true() -> bool {
    true
}

fn default_vendor_id() -> u16 {
    DEFAULT_RECEIVER_VID
}

fn default_product_id() -> u16 {
    DEFAULT_RECEIVER_PID
}

fn default_level_count() -> Option<u8> {
    Some(16)
}

/* ------------------------------------------------------------------ */
/* Receiver model                                                       */
/* ------------------------------------------------------------------ */

#[derive(Debug)]
struct SimSlot {
    spec: TestSlotSpec,
    writes: Vec<BacklightConfig>,
}

#[derive(Debug)]
struct SimPath {
    path: String,
    vendor_id: u16,
    product_id: u16,
    openable: bool,
    slots: Vec<SimSlot>,
}

#[derive(Debug)]
struct SimReceiver {
    paths: Vec<SimPath>,
    enumeration_fails: bool,
    opened: Vec<String>,
}

impl SimReceiver {
    fn slot_mut(&mut self, path: &str, index: u8) -> Option<&mut SimSlot> {
        self.paths
            .iter_mut()
            .find(|p| p.path == path)?
            .slots
            .iter_mut()
            .find(|s| s.spec.index == index)
    }

    /* Compute the reports a real receiver would queue after `frame`. */
    fn handle(&mut self, path: &str, frame: &[u8]) -> Vec<Vec<u8>> {
        let (device_index, feature_index, function) = (frame[1], frame[2], frame[3] >> 4);
        let payload = &frame[4..];

        let Some(slot) = self.slot_mut(path, device_index) else {
            /* Nothing paired there: the request goes unanswered. */
            return Vec::new();
        };

        let mut out = Vec::new();
        if slot.spec.noise {
            out.push(reply(device_index.wrapping_add(1), frame, &[0x00]));
            out.push(vec![REPORT_ID_LONG, device_index, frame[2]]);
            out.push(vec![REPORT_ID_SHORT, device_index, 0x41, 0x04, 0x01, 0x00, 0x00]);
        }

        let answer = if feature_index == ROOT_FEATURE_INDEX {
            if function == ROOT_FN_GET_FEATURE {
                let page = u16::from_be_bytes([payload[0], payload[1]]);
                let index = if page == PAGE_BACKLIGHT2 {
                    slot.spec.feature_index
                } else {
                    0
                };
                reply(device_index, frame, &[index, 0x00, 0x00])
            } else {
                error_reply(device_index, frame, ERR_INVALID_FUNCTION_ID)
            }
        } else if feature_index == slot.spec.feature_index {
            slot.backlight2(device_index, function, frame, payload)
        } else {
            error_reply(device_index, frame, ERR_INVALID_FEATURE_INDEX)
        };
        out.push(answer);
        out
    }
}

impl SimSlot {
    fn backlight2(&mut self, device_index: u8, function: u8, frame: &[u8], payload: &[u8]) -> Vec<u8> {
        match function {
            0x00 if self.spec.reject_reads => error_reply(device_index, frame, ERR_INVALID_ARGUMENT),
            0x00 => reply(device_index, frame, &self.spec.state.to_bytes()),
            0x01 => {
                let mut raw = [0u8; BACKLIGHT_CONFIG_LEN];
                raw.copy_from_slice(&payload[..BACKLIGHT_CONFIG_LEN]);
                let config = BacklightConfig::from_payload(&raw);
                self.writes.push(config);

                let rejected = if config.enabled == 0 {
                    self.spec.reject_off_writes
                } else {
                    self.spec.reject_on_writes
                };
                if rejected {
                    return error_reply(device_index, frame, ERR_INVALID_ARGUMENT);
                }
                if !self.spec.ignore_writes {
                    let state = &mut self.spec.state;
                    state.enabled = config.enabled;
                    state.options = config.options;
                    state.level = config.level;
                    if config.effect != EFFECT_NO_CHANGE {
                        state.effects = u16::from(config.effect);
                    }
                    state.dho = config.dho;
                    state.dhi = config.dhi;
                    state.dpow = config.dpow;
                }
                reply(device_index, frame, &raw)
            }
            0x02 => match self.spec.level_count {
                Some(count) => reply(device_index, frame, &[count]),
                None => error_reply(device_index, frame, ERR_INVALID_FUNCTION_ID),
            },
            _ => error_reply(device_index, frame, ERR_INVALID_FUNCTION_ID),
        }
    }
}

fn reply(device_index: u8, request: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; LONG_REPORT_LEN];
    out[0] = REPORT_ID_LONG;
    out[1] = device_index;
    out[2] = request[2];
    out[3] = request[3];
    let len = data.len().min(LONG_REPORT_LEN - 4);
    out[4..4 + len].copy_from_slice(&data[..len]);
    out
}

fn error_reply(device_index: u8, request: &[u8], code: u8) -> Vec<u8> {
    reply(device_index, request, &[HIDPP20_ERROR, code])
}

/* ------------------------------------------------------------------ */
/* Backend and handles                                                  */
/* ------------------------------------------------------------------ */

/* A `HidBackend` over simulated receivers. Clones share the same devices. */
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    receiver: Arc<Mutex<SimReceiver>>,
    live_handles: Arc<AtomicUsize>,
}

impl SimulatedBackend {
    pub fn new(spec: TestReceiverSpec) -> Self {
        let paths = spec
            .paths
            .into_iter()
            .map(|p| SimPath {
                path: p.path,
                vendor_id: p.vendor_id,
                product_id: p.product_id,
                openable: p.openable,
                slots: p
                    .slots
                    .into_iter()
                    .map(|spec| SimSlot {
                        spec,
                        writes: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        Self {
            receiver: Arc::new(Mutex::new(SimReceiver {
                paths,
                enumeration_fails: spec.enumeration_fails,
                opened: Vec::new(),
            })),
            live_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    /* Parse a JSON receiver description. */
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<TestReceiverSpec>(json).map(Self::new)
    }

    fn lock(&self) -> MutexGuard<'_, SimReceiver> {
        self.receiver.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /* Current BACKLIGHT2 state of a paired keyboard. */
    pub fn slot_state(&self, path: &str, index: u8) -> Option<BacklightState> {
        self.lock().slot_mut(path, index).map(|s| s.spec.state)
    }

    /* Every setBacklightConfig payload the keyboard received, in order. */
    pub fn config_writes(&self, path: &str, index: u8) -> Vec<BacklightConfig> {
        self.lock()
            .slot_mut(path, index)
            .map(|s| s.writes.clone())
            .unwrap_or_default()
    }

    /* Move BACKLIGHT2 to another feature index, as a firmware update would. */
    pub fn set_feature_index(&self, path: &str, index: u8, feature_index: u8) {
        if let Some(slot) = self.lock().slot_mut(path, index) {
            slot.spec.feature_index = feature_index;
        }
    }

    /* Paths opened so far, in order. */
    pub fn opened_paths(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    /* Handles currently open. Zero once every handle has been dropped. */
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HidBackend for SimulatedBackend {
    fn enumerate(&self, vendor_id: u16, product_id: u16) -> Result<Vec<String>> {
        let receiver = self.lock();
        if receiver.enumeration_fails {
            return Err(Error::TransportInit(io::Error::other(
                "simulated enumeration failure",
            )));
        }
        Ok(receiver
            .paths
            .iter()
            .filter(|p| p.vendor_id == vendor_id && p.product_id == product_id)
            .map(|p| p.path.clone())
            .collect())
    }

    async fn open(&self, path: &str) -> io::Result<Box<dyn ReportIo>> {
        {
            let mut receiver = self.lock();
            if !receiver.paths.iter().any(|p| p.path == path && p.openable) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{path}: no such simulated device"),
                ));
            }
            receiver.opened.push(path.to_string());
        }
        self.live_handles.fetch_add(1, Ordering::SeqCst);
        debug!("Opened simulated {path}");

        Ok(Box::new(SimulatedIo {
            backend: self.clone(),
            path: path.to_string(),
            queue: VecDeque::new(),
        }))
    }
}

struct SimulatedIo {
    backend: SimulatedBackend,
    path: String,
    queue: VecDeque<Vec<u8>>,
}

impl Drop for SimulatedIo {
    fn drop(&mut self) {
        self.backend.live_handles.fetch_sub(1, Ordering::SeqCst);
        debug!("Closed simulated {}", self.path);
    }
}

#[async_trait]
impl ReportIo for SimulatedIo {
    fn path(&self) -> &str {
        &self.path
    }

    async fn flush(&mut self) -> io::Result<usize> {
        let n = self.queue.len();
        self.queue.clear();
        Ok(n)
    }

    async fn write_report(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.len() != LONG_REPORT_LEN || buf[0] != REPORT_ID_LONG {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "simulated receiver only accepts HID++ long reports",
            ));
        }
        let replies = self.backend.lock().handle(&self.path, buf);
        self.queue.extend(replies);
        Ok(())
    }

    async fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        match self.queue.pop_front() {
            Some(report) => {
                buf[..report.len()].copy_from_slice(&report);
                Ok(Some(report.len()))
            }
            None => {
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }
}
