//! Naming of the shared memory segments and lock files.
//!
//! Every object the registry creates lives flat in one resource directory and
//! carries the `NI_` prefix, so a rebuild can sweep the directory without
//! touching anything else stored there.

use crate::device::DeviceType;
use crate::error::XcoderResult;
use std::path::{Path, PathBuf};

/// Prefix shared by every registry object.
pub const OBJECT_PREFIX: &str = "NI_";
/// Pool (device queue) segment.
pub const POOL_SHM_NAME: &str = "NI_SHM_CODERS";
/// Pool lock file.
pub const POOL_LCK_NAME: &str = "NI_LCK_CODERS";

/// Environment override for the resource directory.
pub const RSRC_DIR_ENV: &str = "XCODER_RSRC_DIR";

/// Default resource directory: tmpfs where the host has it.
pub fn default_rsrc_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(RSRC_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let shm = Path::new("/dev/shm");
    if shm.is_dir() {
        shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Resolves object names to paths under one resource directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsrcPaths {
    root: PathBuf,
}

impl RsrcPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pool_shm(&self) -> PathBuf {
        self.root.join(POOL_SHM_NAME)
    }

    pub fn pool_lock(&self) -> PathBuf {
        self.root.join(POOL_LCK_NAME)
    }

    /// Per-type lock serializing session-open retries.
    pub fn retry_lock(&self, device_type: DeviceType) -> PathBuf {
        let name = match device_type.xcoder() {
            DeviceType::Decoder => "NI_RETRY_LCK_DECODERS",
            DeviceType::Encoder | DeviceType::Upload => "NI_RETRY_LCK_ENCODERS",
            DeviceType::Scaler => "NI_RETRY_LCK_SCALERS",
            DeviceType::Ai => "NI_RETRY_LCK_AI",
        };
        self.root.join(name)
    }

    /// Segment name of one module, e.g. `NI_shm_e3`.
    pub fn device_shm_name(device_type: DeviceType, guid: i32) -> String {
        format!("NI_shm_{}{}", device_type.type_char(), guid)
    }

    /// Lock file name of one module, e.g. `NI_lck_e3`.
    pub fn device_lock_name(device_type: DeviceType, guid: i32) -> String {
        format!("NI_lck_{}{}", device_type.type_char(), guid)
    }

    pub fn device_shm(&self, device_type: DeviceType, guid: i32) -> PathBuf {
        self.root.join(Self::device_shm_name(device_type, guid))
    }

    pub fn device_lock(&self, device_type: DeviceType, guid: i32) -> PathBuf {
        self.root.join(Self::device_lock_name(device_type, guid))
    }

    /// Delete every `NI_` object in the resource directory. Returns how many
    /// were removed.
    pub fn purge(&self) -> XcoderResult<usize> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(OBJECT_PREFIX) {
                continue;
            }
            if !entry.file_type()?.is_file() {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("cannot remove {}: {}", entry.path().display(), e),
            }
        }
        Ok(removed)
    }
}
