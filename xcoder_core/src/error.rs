//! Unified error handling for the xcoder resource registry
//!
//! Every fallible operation in this crate returns [`XcoderResult`]. The variants
//! follow the failure classes callers are expected to react to differently:
//! shared-state access failures, bad arguments, "no eligible module", transient
//! firmware conditions and corrupted shared state.

use thiserror::Error;

/// Main error type for registry and allocation operations
#[derive(Debug, Error)]
pub enum XcoderError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A shared memory segment or lock file could not be opened, mapped or locked
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// Device backend (NVMe/firmware collaborator) errors
    #[error("Device '{device}' error: {message}")]
    Backend { device: String, message: String },

    /// Firmware reported a condition that clears on its own (e.g. VPU recovery)
    #[error("Transient device condition: {0}")]
    Transient(String),

    /// Shared state failed validation and must be rebuilt
    #[error("Corrupted shared state: {0}")]
    Corrupted(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Resource not found errors
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Already exists errors (for creation operations)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation not supported on this platform
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal errors with source location for debugging.
    /// Use the `xcoder_internal!()` macro to create these.
    #[error("Internal error: {message} (at {file}:{line})")]
    Internal {
        message: String,
        file: &'static str,
        line: u32,
    },
}

/// Create an internal error with automatic file/line capture.
///
/// ```rust,ignore
/// use xcoder_core::xcoder_internal;
/// return Err(xcoder_internal!("slot {} out of range", slot));
/// ```
#[macro_export]
macro_rules! xcoder_internal {
    ($($arg:tt)*) => {
        $crate::error::XcoderError::Internal {
            message: format!($($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Convenience type alias for Results using XcoderError
pub type XcoderResult<T> = std::result::Result<T, XcoderError>;

/// Short alias, equivalent to `XcoderResult<T>`
pub type Result<T> = XcoderResult<T>;

impl From<serde_yaml::Error> for XcoderError {
    fn from(err: serde_yaml::Error) -> Self {
        XcoderError::Config(format!("YAML error: {}", err))
    }
}

// Helper methods
impl XcoderError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(msg: S) -> Self {
        XcoderError::Config(msg.into())
    }

    /// Create a resource-unavailable error
    pub fn unavailable<S: Into<String>>(msg: S) -> Self {
        XcoderError::ResourceUnavailable(msg.into())
    }

    /// Create a backend error with device name and message
    pub fn backend<S: Into<String>, T: Into<String>>(device: S, message: T) -> Self {
        XcoderError::Backend {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create a corrupted-state error
    pub fn corrupted<S: Into<String>>(msg: S) -> Self {
        XcoderError::Corrupted(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        XcoderError::InvalidInput(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        XcoderError::NotFound(msg.into())
    }

    /// True for errors that a bounded retry may clear.
    pub fn is_transient(&self) -> bool {
        matches!(self, XcoderError::Transient(_))
    }

    /// True when the error means "no eligible module", which callers treat as
    /// a normal outcome rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, XcoderError::NotFound(_))
    }
}
