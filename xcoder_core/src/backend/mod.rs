//! Device backend: the NVMe/firmware collaborator.
//!
//! The registry never speaks the card protocol itself. It enumerates devices,
//! opens them, and asks for capability descriptors, live load and trial
//! sessions through [`DeviceBackend`]. Production hosts plug in an NVMe
//! passthrough implementation; tests use [`mock::MockBackend`].

pub mod mock;

use crate::device::{DeviceType, SwInstance, XCODER_TYPE_COUNT};
use crate::error::XcoderResult;
use thiserror::Error;

/// Engine descriptor for one device type on a card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineDescriptor {
    /// Number of engines of this type; zero means disabled.
    pub count: u32,
    pub hw_id: i32,
    pub max_contexts: i32,
    pub max_4k_fps: i32,
    pub min_width: i32,
    pub min_height: i32,
    pub max_width: i32,
    pub max_height: i32,
}

/// Identify-controller style capability descriptor of a card.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapability {
    /// Card reports itself as a supported transcoder.
    pub is_xcoder: bool,
    pub fw_rev: [u8; 8],
    pub fw_rev_nor_flash: [u8; 8],
    pub fl_ver_nor_flash: [u8; 8],
    pub fl_ver_last_ran: [u8; 8],
    pub fw_branch_name: String,
    pub fw_commit_time: String,
    pub fw_commit_hash: String,
    pub fw_build_time: String,
    pub fw_build_id: String,
    pub serial_number: String,
    pub model_number: String,
    /// Indexed by `DeviceType::index()`.
    pub engines: [EngineDescriptor; XCODER_TYPE_COUNT],
}

impl DeviceCapability {
    pub fn engine(&self, device_type: DeviceType) -> &EngineDescriptor {
        &self.engines[device_type.index()]
    }
}

/// Result of a live load query against one engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveLoad {
    pub load: i32,
    pub model_load: i32,
    pub active_instances: u32,
    pub instances: Vec<SwInstance>,
}

/// Failure opening a trial session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Firmware is recovering the video processing unit; retry shortly.
    #[error("VPU recovery in progress")]
    Recovering,
    #[error("session rejected: {0}")]
    Rejected(String),
}

/// Operations the registry needs from the card protocol.
///
/// Implementations must be usable from any thread; the registry calls them
/// synchronously, possibly while holding the pool lock.
pub trait DeviceBackend: Send + Sync {
    type Handle;

    /// Device paths present on the host right now.
    fn enumerate_devices(&self) -> XcoderResult<Vec<String>>;

    fn open(&self, path: &str) -> XcoderResult<Self::Handle>;

    fn close(&self, handle: &Self::Handle);

    fn query_capability(&self, handle: &Self::Handle) -> XcoderResult<DeviceCapability>;

    fn query_live_load(
        &self,
        handle: &Self::Handle,
        hw_id: i32,
        device_type: DeviceType,
    ) -> XcoderResult<LiveLoad>;

    fn open_session(
        &self,
        handle: &Self::Handle,
        hw_id: i32,
        device_type: DeviceType,
    ) -> Result<(), SessionError>;

    fn close_session(&self, handle: &Self::Handle, hw_id: i32, device_type: DeviceType);
}

impl<T: DeviceBackend + ?Sized> DeviceBackend for std::sync::Arc<T> {
    type Handle = T::Handle;

    fn enumerate_devices(&self) -> XcoderResult<Vec<String>> {
        (**self).enumerate_devices()
    }

    fn open(&self, path: &str) -> XcoderResult<Self::Handle> {
        (**self).open(path)
    }

    fn close(&self, handle: &Self::Handle) {
        (**self).close(handle)
    }

    fn query_capability(&self, handle: &Self::Handle) -> XcoderResult<DeviceCapability> {
        (**self).query_capability(handle)
    }

    fn query_live_load(
        &self,
        handle: &Self::Handle,
        hw_id: i32,
        device_type: DeviceType,
    ) -> XcoderResult<LiveLoad> {
        (**self).query_live_load(handle, hw_id, device_type)
    }

    fn open_session(
        &self,
        handle: &Self::Handle,
        hw_id: i32,
        device_type: DeviceType,
    ) -> Result<(), SessionError> {
        (**self).open_session(handle, hw_id, device_type)
    }

    fn close_session(&self, handle: &Self::Handle, hw_id: i32, device_type: DeviceType) {
        (**self).close_session(handle, hw_id, device_type)
    }
}

/// Owns a backend handle and closes it on drop.
pub(crate) struct OpenDevice<'a, B: DeviceBackend> {
    backend: &'a B,
    handle: B::Handle,
}

impl<'a, B: DeviceBackend> OpenDevice<'a, B> {
    pub(crate) fn open(backend: &'a B, path: &str) -> XcoderResult<Self> {
        let handle = backend.open(path)?;
        Ok(Self { backend, handle })
    }

    pub(crate) fn handle(&self) -> &B::Handle {
        &self.handle
    }
}

impl<B: DeviceBackend> Drop for OpenDevice<'_, B> {
    fn drop(&mut self) {
        self.backend.close(&self.handle);
    }
}
