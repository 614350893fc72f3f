//! Shared capability record of one hardware module.
//!
//! `DeviceInfo` is the exact byte layout stored in a module's shared memory
//! segment, so every process mapping the segment sees the same fields. All
//! fields are plain integers or byte arrays; strings are NUL-terminated.
//!
//! # Layout (5288 bytes, repr(C), align 8)
//!
//! ```text
//! magic, version, device_type                     16
//! dev_name, blk_name                              64   -> 80
//! hw_id, module_id, load, model_load              16   -> 96
//! xcode_load_pixel                                 8   -> 104
//! compat warning, max_instance_cnt, max_fps_4k,
//! active_num_inst, instance_count, fw_compat      24   -> 128
//! fw_rev, fw_rev_nor_flash, fl_ver_nor_flash,
//! fl_ver_last_ran                                 32   -> 160
//! branch, commit time/hash, build time/id        605   -> 765
//! serial_number, model_number                     60   -> 825
//! _pad0                                            7   -> 832
//! dev_cap[5] (276 each)                         1380   -> 2212
//! _pad1                                            4   -> 2216
//! sw_instance[128] (24 each)                    3072   -> 5288
//! ```

use super::fw::FwCompatibility;
use super::{
    Codec, DeviceType, CODEC_COUNT, MAX_CONTEXTS_PER_HW_INSTANCE, MAX_DEVICE_NAME_LEN,
};
use crate::backend::{DeviceCapability, EngineDescriptor};
use crate::error::{XcoderError, XcoderResult};
use bytemuck::{Pod, Zeroable};
use std::borrow::Cow;
use std::fmt;

/// Magic number for record validation ("XCDR_DEV")
pub const DEVICE_INFO_MAGIC: u64 = 0x5843_4452_5F44_4556;
/// Current record layout version
pub const DEVICE_INFO_VERSION: u32 = 1;

const PROFILES_LEN: usize = 128;
const LEVEL_LEN: usize = 64;
const ADDITIONAL_INFO_LEN: usize = 64;

// Minimum resolutions the firmware enforces for some codecs.
const MIN_JPEG_DEC_WIDTH: i32 = 48;
const MIN_JPEG_DEC_HEIGHT: i32 = 48;
const MIN_ENC_WIDTH: i32 = 32;
const MIN_ENC_HEIGHT: i32 = 32;
const AV1_MAX_WIDTH: i32 = 4096;
const AV1_MAX_HEIGHT: i32 = 4352;

/// Copy `src` into a fixed buffer, truncating so a NUL terminator always fits.
pub(crate) fn write_cstr(dst: &mut [u8], src: &str) {
    dst.fill(0);
    let n = src.len().min(dst.len().saturating_sub(1));
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
}

/// Read a NUL-terminated buffer.
pub(crate) fn read_cstr(src: &[u8]) -> Cow<'_, str> {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end])
}

/// State of a software instance (session) running on a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwInstanceStatus {
    Idle,
    Active,
}

/// One software instance as reported by the firmware.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwInstance {
    pub id: i32,
    status: u32,
    codec: i32,
    pub width: i32,
    pub height: i32,
    pub fps: i32,
}

// Safety: repr(C), six 4-byte fields, no padding.
unsafe impl Zeroable for SwInstance {}
unsafe impl Pod for SwInstance {}

impl SwInstance {
    pub fn new(
        id: i32,
        status: SwInstanceStatus,
        codec: Option<Codec>,
        width: i32,
        height: i32,
        fps: i32,
    ) -> Self {
        Self {
            id,
            status: match status {
                SwInstanceStatus::Idle => 0,
                SwInstanceStatus::Active => 1,
            },
            codec: codec.map_or(-1, Codec::raw),
            width,
            height,
            fps,
        }
    }

    pub fn status(&self) -> SwInstanceStatus {
        if self.status == 0 {
            SwInstanceStatus::Idle
        } else {
            SwInstanceStatus::Active
        }
    }

    pub fn codec(&self) -> Option<Codec> {
        Codec::from_raw(self.codec)
    }
}

/// What a module can do with one codec.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CodecCapability {
    supports_codec: i32,
    pub max_res_width: i32,
    pub max_res_height: i32,
    pub min_res_width: i32,
    pub min_res_height: i32,
    profiles_supported: [u8; PROFILES_LEN],
    level: [u8; LEVEL_LEN],
    additional_info: [u8; ADDITIONAL_INFO_LEN],
}

// Safety: repr(C), five i32 then 256 bytes of u8 arrays; 276 bytes, no padding.
unsafe impl Zeroable for CodecCapability {}
unsafe impl Pod for CodecCapability {}

impl CodecCapability {
    /// An empty slot.
    pub fn none() -> Self {
        let mut cap = Self::zeroed();
        cap.supports_codec = -1;
        cap
    }

    pub fn supported(
        codec: Codec,
        (min_w, min_h): (i32, i32),
        (max_w, max_h): (i32, i32),
        profiles: &str,
        level: &str,
    ) -> Self {
        let mut cap = Self::zeroed();
        cap.supports_codec = codec.raw();
        cap.min_res_width = min_w;
        cap.min_res_height = min_h;
        cap.max_res_width = max_w;
        cap.max_res_height = max_h;
        write_cstr(&mut cap.profiles_supported, profiles);
        write_cstr(&mut cap.level, level);
        cap
    }

    pub fn codec(&self) -> Option<Codec> {
        Codec::from_raw(self.supports_codec)
    }

    pub fn profiles(&self) -> Cow<'_, str> {
        read_cstr(&self.profiles_supported)
    }

    pub fn level(&self) -> Cow<'_, str> {
        read_cstr(&self.level)
    }

    pub fn additional_info(&self) -> Cow<'_, str> {
        read_cstr(&self.additional_info)
    }
}

impl fmt::Debug for CodecCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecCapability")
            .field("codec", &self.codec())
            .field("min", &(self.min_res_width, self.min_res_height))
            .field("max", &(self.max_res_width, self.max_res_height))
            .field("profiles", &self.profiles())
            .field("level", &self.level())
            .finish()
    }
}

/// Shared capability record of one (device, engine type) module.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DeviceInfo {
    magic: u64,
    version: u32,
    device_type: u32,
    dev_name: [u8; MAX_DEVICE_NAME_LEN],
    blk_name: [u8; MAX_DEVICE_NAME_LEN],
    pub hw_id: i32,
    pub module_id: i32,
    /// Instantaneous load reported by firmware, percent.
    pub load: i32,
    /// Load modelled by firmware.
    pub model_load: i32,
    /// Host-side pixel-rate reservations (encoder admission control).
    pub xcode_load_pixel: u64,
    fw_ver_compat_warning: u32,
    pub max_instance_cnt: i32,
    pub max_fps_4k: i32,
    pub active_num_inst: u32,
    instance_count: u32,
    fw_compat: u32,
    fw_rev: [u8; 8],
    fw_rev_nor_flash: [u8; 8],
    fl_ver_nor_flash: [u8; 8],
    fl_ver_last_ran: [u8; 8],
    fw_branch_name: [u8; 256],
    fw_commit_time: [u8; 26],
    fw_commit_hash: [u8; 41],
    fw_build_time: [u8; 26],
    fw_build_id: [u8; 256],
    serial_number: [u8; 20],
    model_number: [u8; 40],
    _pad0: [u8; 7],
    dev_cap: [CodecCapability; CODEC_COUNT],
    _pad1: [u8; 4],
    sw_instance: [SwInstance; MAX_CONTEXTS_PER_HW_INSTANCE],
}

// Safety: repr(C), every field is an integer or an array of Pod, explicit pad
// fields keep each field naturally aligned. 5288 bytes, 5288 % 8 = 0.
unsafe impl Zeroable for DeviceInfo {}
unsafe impl Pod for DeviceInfo {}

impl DeviceInfo {
    /// A fresh record for `(device_type, guid)` with no capabilities yet.
    pub fn new(device_type: DeviceType, guid: i32) -> Self {
        let mut info = Self::zeroed();
        info.magic = DEVICE_INFO_MAGIC;
        info.version = DEVICE_INFO_VERSION;
        info.device_type = device_type.xcoder().index() as u32;
        info.module_id = guid;
        info.dev_cap = [CodecCapability::none(); CODEC_COUNT];
        info
    }

    /// Check the header against the identity the segment name promises.
    pub fn validate(&self, device_type: DeviceType, guid: i32) -> XcoderResult<()> {
        if self.magic != DEVICE_INFO_MAGIC {
            return Err(XcoderError::corrupted(format!(
                "{} {}: bad record magic {:#x}",
                device_type, guid, self.magic
            )));
        }
        if self.version != DEVICE_INFO_VERSION {
            return Err(XcoderError::corrupted(format!(
                "{} {}: record version {} (expected {})",
                device_type, guid, self.version, DEVICE_INFO_VERSION
            )));
        }
        if self.device_type() != Some(device_type.xcoder()) || self.module_id != guid {
            return Err(XcoderError::corrupted(format!(
                "{} {}: record describes {:?} {}",
                device_type,
                guid,
                self.device_type(),
                self.module_id
            )));
        }
        if self.instance_count as usize > MAX_CONTEXTS_PER_HW_INSTANCE {
            return Err(XcoderError::corrupted(format!(
                "{} {}: instance count {}",
                device_type, guid, self.instance_count
            )));
        }
        Ok(())
    }

    pub fn device_type(&self) -> Option<DeviceType> {
        DeviceType::from_index(self.device_type as usize)
    }

    pub fn dev_name(&self) -> Cow<'_, str> {
        read_cstr(&self.dev_name)
    }

    pub fn blk_name(&self) -> Cow<'_, str> {
        read_cstr(&self.blk_name)
    }

    pub fn set_dev_name(&mut self, name: &str) {
        write_cstr(&mut self.dev_name, name);
    }

    pub fn set_blk_name(&mut self, name: &str) {
        write_cstr(&mut self.blk_name, name);
    }

    pub fn fw_compat(&self) -> FwCompatibility {
        FwCompatibility::from_raw(self.fw_compat)
    }

    pub fn set_fw_compat(&mut self, compat: FwCompatibility) {
        self.fw_compat = compat.raw();
        self.fw_ver_compat_warning = u32::from(compat == FwCompatibility::Partial);
    }

    /// Firmware is older or newer than this library in a minor way.
    pub fn fw_ver_compat_warning(&self) -> bool {
        self.fw_ver_compat_warning != 0
    }

    /// Only modules whose firmware is not incompatible may be allocated.
    pub fn is_eligible(&self) -> bool {
        self.fw_compat().is_usable()
    }

    pub fn fw_rev(&self) -> &[u8; 8] {
        &self.fw_rev
    }

    pub fn fw_rev_str(&self) -> Cow<'_, str> {
        read_cstr(&self.fw_rev)
    }

    pub fn fw_rev_nor_flash(&self) -> Cow<'_, str> {
        read_cstr(&self.fw_rev_nor_flash)
    }

    pub fn fl_ver_nor_flash(&self) -> Cow<'_, str> {
        read_cstr(&self.fl_ver_nor_flash)
    }

    pub fn fl_ver_last_ran(&self) -> Cow<'_, str> {
        read_cstr(&self.fl_ver_last_ran)
    }

    pub fn fw_branch_name(&self) -> Cow<'_, str> {
        read_cstr(&self.fw_branch_name)
    }

    pub fn fw_commit_time(&self) -> Cow<'_, str> {
        read_cstr(&self.fw_commit_time)
    }

    pub fn fw_commit_hash(&self) -> Cow<'_, str> {
        read_cstr(&self.fw_commit_hash)
    }

    pub fn fw_build_time(&self) -> Cow<'_, str> {
        read_cstr(&self.fw_build_time)
    }

    pub fn fw_build_id(&self) -> Cow<'_, str> {
        read_cstr(&self.fw_build_id)
    }

    pub fn serial_number(&self) -> Cow<'_, str> {
        read_cstr(&self.serial_number)
    }

    pub fn model_number(&self) -> Cow<'_, str> {
        read_cstr(&self.model_number)
    }

    /// Copy the card-wide identity from a capability query.
    pub fn fill_identity(
        &mut self,
        dev_name: &str,
        capability: &DeviceCapability,
        compat: FwCompatibility,
    ) {
        self.set_dev_name(dev_name);
        self.set_blk_name(dev_name);
        self.set_fw_compat(compat);
        self.fw_rev = capability.fw_rev;
        self.fw_rev_nor_flash = capability.fw_rev_nor_flash;
        self.fl_ver_nor_flash = capability.fl_ver_nor_flash;
        self.fl_ver_last_ran = capability.fl_ver_last_ran;
        write_cstr(&mut self.fw_branch_name, &capability.fw_branch_name);
        write_cstr(&mut self.fw_commit_time, &capability.fw_commit_time);
        write_cstr(&mut self.fw_commit_hash, &capability.fw_commit_hash);
        write_cstr(&mut self.fw_build_time, &capability.fw_build_time);
        write_cstr(&mut self.fw_build_id, &capability.fw_build_id);
        write_cstr(&mut self.serial_number, &capability.serial_number);
        write_cstr(&mut self.model_number, &capability.model_number);
    }

    /// Copy one engine's descriptor and derive its codec table.
    pub fn fill_engine(&mut self, engine: &EngineDescriptor) {
        self.hw_id = engine.hw_id;
        self.max_instance_cnt = engine.max_contexts;
        self.max_fps_4k = engine.max_4k_fps;

        let min = (engine.min_width, engine.min_height);
        let max = (engine.max_width, engine.max_height);
        self.dev_cap = [CodecCapability::none(); CODEC_COUNT];

        match self.device_type() {
            Some(DeviceType::Decoder) => {
                self.dev_cap[0] =
                    CodecCapability::supported(Codec::H264, min, max, "Baseline, Main, High, High10", "6.2");
                self.dev_cap[1] = CodecCapability::supported(Codec::H265, min, max, "Main, Main10", "6.2");
                self.dev_cap[2] = CodecCapability::supported(
                    Codec::Jpeg,
                    (MIN_JPEG_DEC_WIDTH, MIN_JPEG_DEC_HEIGHT),
                    max,
                    "Baseline",
                    "6.2",
                );
                self.dev_cap[3] = CodecCapability::supported(Codec::Vp9, min, max, "0, 2", "6.2");
            }
            Some(DeviceType::Encoder) => {
                self.dev_cap[0] =
                    CodecCapability::supported(Codec::H264, min, max, "Baseline, Main, High, High10", "6.2");
                self.dev_cap[1] = CodecCapability::supported(Codec::H265, min, max, "Main, Main10", "6.2");
                self.dev_cap[2] = CodecCapability::supported(
                    Codec::Jpeg,
                    (MIN_ENC_WIDTH, MIN_ENC_HEIGHT),
                    max,
                    "Main",
                    "5.1",
                );
                self.dev_cap[3] = CodecCapability::supported(
                    Codec::Av1,
                    min,
                    (AV1_MAX_WIDTH, AV1_MAX_HEIGHT),
                    "Main",
                    "5.1",
                );
            }
            // scaler and AI engines are not codec engines
            _ => {}
        }
    }

    /// Supported codecs, in table order.
    pub fn capabilities(&self) -> impl Iterator<Item = &CodecCapability> {
        self.dev_cap.iter().filter(|c| c.codec().is_some())
    }

    pub fn capability(&self, codec: Codec) -> Option<&CodecCapability> {
        self.capabilities().find(|c| c.codec() == Some(codec))
    }

    /// Software instances from the last live update.
    pub fn instances(&self) -> &[SwInstance] {
        let n = (self.instance_count as usize).min(MAX_CONTEXTS_PER_HW_INSTANCE);
        &self.sw_instance[..n]
    }

    /// Replace the instance list, keeping at most the table capacity.
    pub fn set_instances(&mut self, instances: &[SwInstance]) {
        let n = instances.len().min(MAX_CONTEXTS_PER_HW_INSTANCE);
        if n < instances.len() {
            log::warn!(
                "{} {}: {} instances reported, keeping {}",
                self.dev_name(),
                self.module_id,
                instances.len(),
                n
            );
        }
        self.sw_instance[..n].copy_from_slice(&instances[..n]);
        self.sw_instance[n..].fill(SwInstance::zeroed());
        self.instance_count = n as u32;
    }
}

impl fmt::Debug for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceInfo")
            .field("device_type", &self.device_type())
            .field("module_id", &self.module_id)
            .field("dev_name", &self.dev_name())
            .field("hw_id", &self.hw_id)
            .field("load", &self.load)
            .field("model_load", &self.model_load)
            .field("xcode_load_pixel", &self.xcode_load_pixel)
            .field("active_num_inst", &self.active_num_inst)
            .field("fw_rev", &self.fw_rev_str())
            .field("fw_compat", &self.fw_compat())
            .finish()
    }
}
