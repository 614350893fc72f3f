//! Device model: engine types, codecs, the shared capability record and the
//! scoped context that maps it.

pub mod capacity;
pub mod context;
pub mod fw;
pub mod info;

pub use capacity::{ReferenceCapacity, ReferenceCapacityTable};
pub use context::{DeviceContext, DeviceGuard};
pub use fw::{is_fw_compat, FwCompatibility, LIBRARY_FW_REVISION};
pub use info::{CodecCapability, DeviceInfo, SwInstance, SwInstanceStatus};

use crate::error::XcoderError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Registry capacity per device type.
pub const MAX_DEVICE_CNT: usize = 128;
/// Longest device path stored in a record, including the terminating NUL.
pub const MAX_DEVICE_NAME_LEN: usize = 32;
/// Software instances tracked per hardware module.
pub const MAX_CONTEXTS_PER_HW_INSTANCE: usize = 128;
/// Engine types that own a registry queue.
pub const XCODER_TYPE_COUNT: usize = 4;
/// Codec slots in a capability table.
pub const CODEC_COUNT: usize = 5;

/// Kind of codec engine on a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Decoder,
    Encoder,
    Scaler,
    Ai,
    /// Frame upload; runs on encoder instances.
    Upload,
}

impl DeviceType {
    /// Types with their own registry queue, in index order.
    pub const XCODERS: [DeviceType; XCODER_TYPE_COUNT] = [
        DeviceType::Decoder,
        DeviceType::Encoder,
        DeviceType::Scaler,
        DeviceType::Ai,
    ];

    /// Fold `Upload` onto `Encoder`.
    pub fn xcoder(self) -> DeviceType {
        match self {
            DeviceType::Upload => DeviceType::Encoder,
            other => other,
        }
    }

    /// Index into per-type arrays.
    pub fn index(self) -> usize {
        match self.xcoder() {
            DeviceType::Decoder => 0,
            DeviceType::Encoder | DeviceType::Upload => 1,
            DeviceType::Scaler => 2,
            DeviceType::Ai => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<DeviceType> {
        Self::XCODERS.get(index).copied()
    }

    /// Character used in segment and lock names.
    pub fn type_char(self) -> char {
        match self.xcoder() {
            DeviceType::Decoder => 'd',
            DeviceType::Encoder | DeviceType::Upload => 'e',
            DeviceType::Scaler => 's',
            DeviceType::Ai => 'a',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Decoder => "decoder",
            DeviceType::Encoder => "encoder",
            DeviceType::Scaler => "scaler",
            DeviceType::Ai => "ai",
            DeviceType::Upload => "uploader",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = XcoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "decoder" | "dec" | "d" => Ok(DeviceType::Decoder),
            "encoder" | "enc" | "e" => Ok(DeviceType::Encoder),
            "scaler" | "s" => Ok(DeviceType::Scaler),
            "ai" | "a" => Ok(DeviceType::Ai),
            "uploader" | "upload" | "u" => Ok(DeviceType::Upload),
            other => Err(XcoderError::invalid_input(format!(
                "unknown device type '{}'",
                other
            ))),
        }
    }
}

/// Video codec, indexed like the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    H264,
    H265,
    Vp9,
    Jpeg,
    Av1,
}

impl Codec {
    pub const ALL: [Codec; CODEC_COUNT] =
        [Codec::H264, Codec::H265, Codec::Vp9, Codec::Jpeg, Codec::Av1];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Decode the raw value stored in shared records; negative means none.
    pub fn from_raw(raw: i32) -> Option<Codec> {
        usize::try_from(raw).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn raw(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Codec::H264 => "H.264",
            Codec::H265 => "H.265",
            Codec::Vp9 => "VP9",
            Codec::Jpeg => "JPEG",
            Codec::Av1 => "AV1",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Codec {
    type Err = XcoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('.', "").as_str() {
            "h264" | "avc" => Ok(Codec::H264),
            "h265" | "hevc" => Ok(Codec::H265),
            "vp9" => Ok(Codec::Vp9),
            "jpeg" | "mjpeg" => Ok(Codec::Jpeg),
            "av1" => Ok(Codec::Av1),
            other => Err(XcoderError::invalid_input(format!("unknown codec '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_folds_onto_encoder() {
        assert_eq!(DeviceType::Upload.xcoder(), DeviceType::Encoder);
        assert_eq!(DeviceType::Upload.index(), DeviceType::Encoder.index());
        assert_eq!(DeviceType::Upload.type_char(), 'e');
    }

    #[test]
    fn index_round_trips_for_xcoder_types() {
        for t in DeviceType::XCODERS {
            assert_eq!(DeviceType::from_index(t.index()), Some(t));
        }
        assert_eq!(DeviceType::from_index(XCODER_TYPE_COUNT), None);
    }

    #[test]
    fn codec_raw_values() {
        assert_eq!(Codec::from_raw(-1), None);
        assert_eq!(Codec::from_raw(0), Some(Codec::H264));
        assert_eq!(Codec::from_raw(4), Some(Codec::Av1));
        assert_eq!(Codec::from_raw(5), None);
        assert_eq!("HEVC".parse::<Codec>().unwrap(), Codec::H265);
        assert_eq!("h.264".parse::<Codec>().unwrap(), Codec::H264);
    }

    #[test]
    fn parses_device_types() {
        assert_eq!("Encoder".parse::<DeviceType>().unwrap(), DeviceType::Encoder);
        assert_eq!("ai".parse::<DeviceType>().unwrap(), DeviceType::Ai);
        assert!("gpu".parse::<DeviceType>().is_err());
    }
}
