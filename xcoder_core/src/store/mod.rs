//! # Resource store
//!
//! [`ResourceStore`] pairs the shared [`Registry`] with a [`DeviceBackend`]
//! and adds every operation that has to talk to the cards: discovery and
//! registration, live-load scans, automatic allocation and the hardware
//! availability check.

mod allocation;
mod discovery;

pub use allocation::{AllocRule, AvailableDevice};
pub use discovery::{sort_device_names, RefreshReport};

use crate::backend::{DeviceBackend, OpenDevice};
use crate::config::RsrcConfig;
use crate::device::DeviceContext;
use crate::error::XcoderResult;
use crate::health::apply_live_load;
use crate::registry::Registry;
use std::time::Duration;

pub struct ResourceStore<B: DeviceBackend> {
    registry: Registry,
    backend: B,
}

impl<B: DeviceBackend> ResourceStore<B> {
    pub fn new(config: RsrcConfig, backend: B) -> Self {
        Self {
            registry: Registry::new(config),
            backend,
        }
    }

    /// Build a store and initialize the shared registry in one step.
    pub fn open_or_create(
        config: RsrcConfig,
        backend: B,
        should_match_fw_rev: bool,
        timeout: Duration,
    ) -> XcoderResult<Self> {
        let store = Self::new(config, backend);
        store.init(should_match_fw_rev, timeout)?;
        Ok(store)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Query a module's engine and fold the answer into its record, all
    /// under the device lock.
    pub(crate) fn refresh_module(&self, ctx: &mut DeviceContext) -> XcoderResult<()> {
        let device_type = ctx.device_type();
        let mut info = ctx.lock()?;
        let device = OpenDevice::open(&self.backend, &info.dev_name())?;
        let live = self
            .backend
            .query_live_load(device.handle(), info.hw_id, device_type)?;
        apply_live_load(&mut info, &live);
        info.flush();
        Ok(())
    }
}

impl<B: DeviceBackend> std::fmt::Debug for ResourceStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStore")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
