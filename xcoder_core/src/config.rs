//! Registry configuration
//!
//! Every field has a default matching the behaviour of a stock host, so an
//! empty file (or no file at all) is a valid configuration.
//!
//! # Example xcoder.yaml
//!
//! ```yaml
//! # Directory holding the NI_* segments and lock files
//! rsrc_dir: /dev/shm
//!
//! # Poll period while init waits for the first card
//! discovery_interval_ms: 3000
//!
//! # Bounded wait on a pool lock left held by a wedged process
//! pool_lock_retry_ms: 10
//! pool_lock_timeout_ms: 9000
//!
//! # Trial sessions while firmware recovers
//! hw_check_attempts: 10
//! hw_check_backoff_ms: 200
//!
//! # Replace entries of the reference capacity table
//! reference_table:
//!   - device_type: encoder
//!     codec: av1
//!     width: 1920
//!     height: 1080
//!     fps: 120
//! ```

use crate::device::{
    capacity::job_pixels, Codec, DeviceType, ReferenceCapacity, ReferenceCapacityTable,
};
use crate::error::{XcoderError, XcoderResult};
use crate::memory::{default_rsrc_dir, platform::RSRC_DIR_ENV};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Registry configuration from xcoder.yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsrcConfig {
    /// Resource directory; `XCODER_RSRC_DIR` takes precedence when set
    pub rsrc_dir: Option<PathBuf>,

    /// Enumeration poll period while init waits for a device
    pub discovery_interval_ms: u64,

    /// Period between non-blocking pool lock attempts
    pub pool_lock_retry_ms: u64,

    /// Give up on the pool lock after this long
    pub pool_lock_timeout_ms: u64,

    /// Period between per-type retry lock attempts
    pub retry_lock_wait_ms: u64,

    /// Per-type retry lock attempts before giving up
    pub retry_lock_attempts: u32,

    /// Attempts at creating the per-type retry lock files during init
    pub lock_file_attempts: u32,

    /// Pause between lock file creation attempts
    pub lock_file_backoff_ms: u64,

    /// Trial session attempts while firmware reports recovery
    pub hw_check_attempts: u32,

    /// Pause between trial session attempts
    pub hw_check_backoff_ms: u64,

    /// Overrides applied on top of the built-in reference table
    pub reference_table: Vec<ReferenceOverride>,
}

/// One replaced reference table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOverride {
    pub device_type: DeviceType,
    pub codec: Codec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for RsrcConfig {
    fn default() -> Self {
        Self {
            rsrc_dir: None,
            discovery_interval_ms: 3000,
            pool_lock_retry_ms: 10,
            pool_lock_timeout_ms: 9000,
            retry_lock_wait_ms: 10,
            retry_lock_attempts: 6000,
            lock_file_attempts: 5,
            lock_file_backoff_ms: 1000,
            hw_check_attempts: 10,
            hw_check_backoff_ms: 200,
            reference_table: Vec::new(),
        }
    }
}

impl RsrcConfig {
    /// Defaults rooted at `dir`.
    pub fn with_rsrc_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            rsrc_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Load configuration from a YAML string
    pub fn from_yaml(content: &str) -> XcoderResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> XcoderResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            XcoderError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> XcoderResult<()> {
        if self.pool_lock_retry_ms == 0 || self.retry_lock_wait_ms == 0 {
            return Err(XcoderError::config("lock retry periods must be non-zero"));
        }
        if self.hw_check_attempts == 0 {
            return Err(XcoderError::config("hw_check_attempts must be at least 1"));
        }
        if self.lock_file_attempts == 0 {
            return Err(XcoderError::config("lock_file_attempts must be at least 1"));
        }
        for entry in &self.reference_table {
            if entry.device_type == DeviceType::Upload {
                return Err(XcoderError::config(
                    "reference_table: use 'encoder' for uploader entries",
                ));
            }
            if job_pixels(entry.width, entry.height, entry.fps).is_none() {
                return Err(XcoderError::config(format!(
                    "reference_table: {} {} {}x{}@{} overflows the pixel rate",
                    entry.device_type, entry.codec, entry.width, entry.height, entry.fps
                )));
            }
        }
        Ok(())
    }

    /// Resolved resource directory.
    pub fn rsrc_dir(&self) -> PathBuf {
        if let Some(dir) = std::env::var_os(RSRC_DIR_ENV) {
            return PathBuf::from(dir);
        }
        self.rsrc_dir.clone().unwrap_or_else(default_rsrc_dir)
    }

    /// Built-in reference table with the configured overrides applied.
    pub fn reference_table(&self) -> ReferenceCapacityTable {
        let mut table = ReferenceCapacityTable::default();
        for entry in &self.reference_table {
            table.set(
                entry.device_type,
                entry.codec,
                ReferenceCapacity::new(entry.width, entry.height, entry.fps),
            );
        }
        table
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn pool_lock_retry(&self) -> Duration {
        Duration::from_millis(self.pool_lock_retry_ms)
    }

    pub fn pool_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_lock_timeout_ms)
    }

    pub fn retry_lock_wait(&self) -> Duration {
        Duration::from_millis(self.retry_lock_wait_ms)
    }

    pub fn lock_file_backoff(&self) -> Duration {
        Duration::from_millis(self.lock_file_backoff_ms)
    }

    pub fn hw_check_backoff(&self) -> Duration {
        Duration::from_millis(self.hw_check_backoff_ms)
    }
}
