//! # Shared memory and cross-process locking
//!
//! - **ShmRegion**: a durable, file-backed mapping holding one repr(C) record
//! - **CrossProcessMutex**: an advisory lock file with a drop guard
//! - **RsrcPaths**: deterministic names for every segment and lock file
//!
//! Records are viewed through `bytemuck`, so no raw pointer ever leaves this
//! module.

pub mod lock;
pub mod platform;
pub mod shm_region;

pub use lock::{CrossProcessMutex, LockGuard, OwnedLockGuard};
pub use platform::{default_rsrc_dir, RsrcPaths};
pub use shm_region::ShmRegion;
