//! In-memory backend simulating a host full of transcoder cards.
//!
//! Cards can be plugged and unplugged at runtime, their live load scripted,
//! and trial sessions made to fail. Open/close calls are counted so tests can
//! check that every opened handle is closed again.

use super::{DeviceBackend, DeviceCapability, EngineDescriptor, LiveLoad, SessionError};
use crate::device::{DeviceType, LIBRARY_FW_REVISION, XCODER_TYPE_COUNT};
use crate::error::{XcoderError, XcoderResult};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

/// One simulated card.
#[derive(Debug, Clone)]
pub struct MockCard {
    pub capability: DeviceCapability,
    /// Live load answered per engine type.
    pub live: [LiveLoad; XCODER_TYPE_COUNT],
    /// Open fails while false, as for a card that is present but wedged.
    pub openable: bool,
    /// Capability queries fail while true.
    pub capability_fails: bool,
    /// Scripted trial-session outcomes per engine type; empty means success.
    pub session_script: [VecDeque<Result<(), SessionError>>; XCODER_TYPE_COUNT],
}

impl MockCard {
    /// A card running this library's firmware with one engine of each type.
    pub fn transcoder(serial: &str) -> Self {
        Self::with_fw(serial, LIBRARY_FW_REVISION)
    }

    pub fn with_fw(serial: &str, fw_rev: [u8; 8]) -> Self {
        let mut engines = [EngineDescriptor::default(); XCODER_TYPE_COUNT];
        for device_type in DeviceType::XCODERS {
            engines[device_type.index()] = EngineDescriptor {
                count: 1,
                hw_id: device_type.index() as i32,
                max_contexts: 32,
                max_4k_fps: 240,
                min_width: 144,
                min_height: 144,
                max_width: 8192,
                max_height: 8192,
            };
        }

        Self {
            capability: DeviceCapability {
                is_xcoder: true,
                fw_rev,
                fw_rev_nor_flash: fw_rev,
                fw_branch_name: "release".to_string(),
                fw_commit_hash: "0000000000000000000000000000000000000000".to_string(),
                serial_number: serial.to_string(),
                model_number: "T408".to_string(),
                engines,
                ..DeviceCapability::default()
            },
            live: Default::default(),
            openable: true,
            capability_fails: false,
            session_script: Default::default(),
        }
    }

    /// A device that answers but is not a transcoder.
    pub fn not_a_transcoder(serial: &str) -> Self {
        let mut card = Self::transcoder(serial);
        card.capability.is_xcoder = false;
        card
    }

    /// Disable the engines of one type.
    pub fn without(mut self, device_type: DeviceType) -> Self {
        self.capability.engines[device_type.index()].count = 0;
        self
    }
}

#[derive(Debug, Default)]
struct State {
    cards: BTreeMap<String, MockCard>,
    opened: usize,
    closed: usize,
    live_queries: usize,
    session_attempts: usize,
}

/// Simulated host.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`plug`](Self::plug).
    pub fn with_card(self, path: &str, card: MockCard) -> Self {
        self.plug(path, card);
        self
    }

    /// Hot-plug a card.
    pub fn plug(&self, path: &str, card: MockCard) {
        self.state.lock().cards.insert(path.to_string(), card);
    }

    /// Hot-unplug a card.
    pub fn unplug(&self, path: &str) -> Option<MockCard> {
        self.state.lock().cards.remove(path)
    }

    /// Edit a plugged card in place.
    pub fn update<F: FnOnce(&mut MockCard)>(&self, path: &str, f: F) {
        if let Some(card) = self.state.lock().cards.get_mut(path) {
            f(card);
        }
    }

    pub fn set_live_load(&self, path: &str, device_type: DeviceType, live: LiveLoad) {
        self.update(path, |card| card.live[device_type.index()] = live);
    }

    pub fn push_session_result(
        &self,
        path: &str,
        device_type: DeviceType,
        result: Result<(), SessionError>,
    ) {
        self.update(path, |card| {
            card.session_script[device_type.index()].push_back(result)
        });
    }

    /// Handles opened and not yet closed.
    pub fn open_handles(&self) -> usize {
        let state = self.state.lock();
        state.opened - state.closed
    }

    /// Total successful opens so far.
    pub fn opens(&self) -> usize {
        self.state.lock().opened
    }

    pub fn live_queries(&self) -> usize {
        self.state.lock().live_queries
    }

    pub fn session_attempts(&self) -> usize {
        self.state.lock().session_attempts
    }

    fn on_card<T>(
        &self,
        path: &str,
        f: impl FnOnce(&mut MockCard) -> XcoderResult<T>,
    ) -> XcoderResult<T> {
        let mut state = self.state.lock();
        match state.cards.get_mut(path) {
            Some(card) => f(card),
            None => Err(XcoderError::backend(path, "no such device")),
        }
    }
}

impl DeviceBackend for MockBackend {
    type Handle = String;

    fn enumerate_devices(&self) -> XcoderResult<Vec<String>> {
        Ok(self.state.lock().cards.keys().cloned().collect())
    }

    fn open(&self, path: &str) -> XcoderResult<String> {
        let mut state = self.state.lock();
        match state.cards.get(path).map(|card| card.openable) {
            Some(true) => {
                state.opened += 1;
                Ok(path.to_string())
            }
            Some(false) => Err(XcoderError::backend(path, "open failed")),
            None => Err(XcoderError::backend(path, "no such device")),
        }
    }

    fn close(&self, _handle: &String) {
        self.state.lock().closed += 1;
    }

    fn query_capability(&self, handle: &String) -> XcoderResult<DeviceCapability> {
        self.on_card(handle, |card| {
            if card.capability_fails {
                Err(XcoderError::backend(handle.as_str(), "identify failed"))
            } else {
                Ok(card.capability.clone())
            }
        })
    }

    fn query_live_load(
        &self,
        handle: &String,
        _hw_id: i32,
        device_type: DeviceType,
    ) -> XcoderResult<LiveLoad> {
        self.state.lock().live_queries += 1;
        self.on_card(handle, |card| Ok(card.live[device_type.index()].clone()))
    }

    fn open_session(
        &self,
        handle: &String,
        _hw_id: i32,
        device_type: DeviceType,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.session_attempts += 1;
        match state.cards.get_mut(handle.as_str()) {
            Some(card) => card.session_script[device_type.index()]
                .pop_front()
                .unwrap_or(Ok(())),
            None => Err(SessionError::Rejected("no such device".to_string())),
        }
    }

    fn close_session(&self, _handle: &String, _hw_id: i32, _device_type: DeviceType) {}
}
