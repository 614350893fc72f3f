//! # xcoder core
//!
//! Host-side registry and allocator for NVMe transcoder cards.
//!
//! Every card exposes up to four kinds of engine (decoder, encoder, scaler,
//! AI). Each (card, engine type) pair is a *module* with a GUID, described by
//! a record in shared memory that every process on the host maps. This crate
//! provides:
//!
//! - **Registry**: the shared device pool, per-module records and their
//!   cross-process locks
//! - **Discovery**: enumeration, firmware compatibility, registration,
//!   hot-plug refresh and self-healing of corrupted state
//! - **Allocation**: least-loaded selection with admission control, automatic
//!   and direct allocation, release of reserved load
//! - **Health**: folding live firmware reports into the records
//!
//! The card protocol itself lives behind [`DeviceBackend`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use xcoder_core::backend::mock::{MockBackend, MockCard};
//! use xcoder_core::{AllocRule, Codec, DeviceType, ResourceStore, RsrcConfig};
//!
//! let backend = MockBackend::new().with_card("/dev/nvme0n1", MockCard::transcoder("SN0"));
//! let store = ResourceStore::new(RsrcConfig::with_rsrc_dir("/tmp/xcoder"), backend);
//! store.init(true, Duration::from_secs(5))?;
//!
//! let job = store.allocate_auto(DeviceType::Encoder, AllocRule::LeastLoad, Codec::H264, 1920, 1080, 30)?;
//! println!("encoding on module {}", job.guid());
//! job.release()?;
//! # Ok::<(), xcoder_core::XcoderError>(())
//! ```

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod health;
pub mod memory;
pub mod registry;
pub mod store;

pub use backend::{DeviceBackend, DeviceCapability, EngineDescriptor, LiveLoad, SessionError};
pub use config::{ReferenceOverride, RsrcConfig};
pub use device::{
    is_fw_compat, Codec, DeviceContext, DeviceInfo, DeviceType, FwCompatibility,
    ReferenceCapacity, ReferenceCapacityTable, SwInstance, SwInstanceStatus, MAX_DEVICE_CNT,
};
pub use error::{XcoderError, XcoderResult};
pub use health::{update_device_load, update_record};
pub use registry::{
    move_to_end_of_pool, print_device_info, release, AllDevices, Allocation, DevicePool, Registry,
};
pub use store::{sort_device_names, AllocRule, AvailableDevice, RefreshReport, ResourceStore};
