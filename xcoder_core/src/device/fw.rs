//! Firmware / library API compatibility.
//!
//! A firmware revision is 8 ASCII bytes, e.g. `40064rcB`. Byte 3 is the API
//! major version and byte 4 the API minor version.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Firmware revision this library speaks.
pub const LIBRARY_FW_REVISION: [u8; 8] = *b"40064rcB";

const API_MAJOR_IDX: usize = 3;
const API_MINOR_IDX: usize = 4;

/// Outcome of comparing a card's firmware against the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FwCompatibility {
    /// API major differs; the card cannot be driven.
    Incompatible,
    /// API major and minor both match.
    Full,
    /// API major matches but minor differs; some features may be missing.
    Partial,
}

impl FwCompatibility {
    /// Value stored in shared records (0 none, 1 full, 2 partial).
    pub fn raw(self) -> u32 {
        match self {
            FwCompatibility::Incompatible => 0,
            FwCompatibility::Full => 1,
            FwCompatibility::Partial => 2,
        }
    }

    pub fn from_raw(raw: u32) -> FwCompatibility {
        match raw {
            1 => FwCompatibility::Full,
            2 => FwCompatibility::Partial,
            _ => FwCompatibility::Incompatible,
        }
    }

    pub fn is_usable(self) -> bool {
        self != FwCompatibility::Incompatible
    }
}

impl fmt::Display for FwCompatibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FwCompatibility::Incompatible => "incompatible",
            FwCompatibility::Full => "compatible",
            FwCompatibility::Partial => "partially compatible",
        };
        f.write_str(s)
    }
}

/// Compare `fw_rev` against [`LIBRARY_FW_REVISION`].
pub fn is_fw_compat(fw_rev: &[u8; 8]) -> FwCompatibility {
    compare_fw_revision(fw_rev, &LIBRARY_FW_REVISION)
}

/// Compare a card revision against an arbitrary library revision.
pub fn compare_fw_revision(fw_rev: &[u8; 8], library: &[u8; 8]) -> FwCompatibility {
    if fw_rev[API_MAJOR_IDX] != library[API_MAJOR_IDX] {
        FwCompatibility::Incompatible
    } else if fw_rev[API_MINOR_IDX] != library[API_MINOR_IDX] {
        FwCompatibility::Partial
    } else {
        FwCompatibility::Full
    }
}
