//! Reference throughput per (engine type, codec).
//!
//! A reference entry is the job size that loads one module to 100%. Admission
//! control normalizes `width * height * fps` of a new job against it.

use super::{Codec, DeviceType, CODEC_COUNT, XCODER_TYPE_COUNT};
use serde::{Deserialize, Serialize};

/// `{width, height, fps}` defining 100% load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCapacity {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl ReferenceCapacity {
    pub const fn new(width: u32, height: u32, fps: u32) -> Self {
        Self { width, height, fps }
    }

    /// Pixels per second at 100% load, `None` when it does not fit a u64.
    pub fn total_pixels(&self) -> Option<u64> {
        job_pixels(self.width, self.height, self.fps)
    }

    /// A zero entry means the pair cannot be admitted.
    pub fn is_zero(&self) -> bool {
        self.width == 0 || self.height == 0 || self.fps == 0
    }
}

/// Pixel rate of a job, `None` on overflow.
pub fn job_pixels(width: u32, height: u32, fps: u32) -> Option<u64> {
    u64::from(width)
        .checked_mul(u64::from(height))?
        .checked_mul(u64::from(fps))
}

/// Static capacity table, indexed by engine type then codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceCapacityTable {
    entries: [[ReferenceCapacity; CODEC_COUNT]; XCODER_TYPE_COUNT],
}

impl Default for ReferenceCapacityTable {
    /// 1080p240 for H.264 and H.265 on decoders and encoders; everything else
    /// has no reference and is never admitted by the capacity check.
    fn default() -> Self {
        let mut table = Self::empty();
        let full_hd_240 = ReferenceCapacity::new(1920, 1080, 240);
        for device_type in [DeviceType::Decoder, DeviceType::Encoder] {
            for codec in [Codec::H264, Codec::H265] {
                table.set(device_type, codec, full_hd_240);
            }
        }
        table
    }
}

impl ReferenceCapacityTable {
    pub fn empty() -> Self {
        Self {
            entries: [[ReferenceCapacity::default(); CODEC_COUNT]; XCODER_TYPE_COUNT],
        }
    }

    pub fn get(&self, device_type: DeviceType, codec: Codec) -> ReferenceCapacity {
        self.entries[device_type.index()][codec.index()]
    }

    pub fn set(&mut self, device_type: DeviceType, codec: Codec, capacity: ReferenceCapacity) {
        self.entries[device_type.index()][codec.index()] = capacity;
    }
}
