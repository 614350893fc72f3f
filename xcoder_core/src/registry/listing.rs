//! Read-only views of the registry and their text rendering.

use super::Registry;
use crate::device::{DeviceInfo, DeviceType, SwInstanceStatus, XCODER_TYPE_COUNT};
use crate::error::XcoderResult;
use std::io::Write;

/// Snapshot of every registered module, grouped by type in queue order.
#[derive(Debug, Clone, Default)]
pub struct AllDevices {
    devices: [Vec<DeviceInfo>; XCODER_TYPE_COUNT],
}

impl AllDevices {
    pub fn get(&self, device_type: DeviceType) -> &[DeviceInfo] {
        &self.devices[device_type.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceType, &[DeviceInfo])> {
        DeviceType::XCODERS
            .into_iter()
            .map(move |t| (t, self.get(t)))
    }

    pub fn total(&self) -> usize {
        self.devices.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Registry {
    /// Snapshots of every module of one type, least recently allocated first.
    /// Modules whose record cannot be opened are skipped.
    pub fn list_devices(&self, device_type: DeviceType) -> XcoderResult<Vec<DeviceInfo>> {
        let device_type = device_type.xcoder();
        let mut pool = self.get_device_pool()?;
        let queue = pool.lock()?;

        let mut infos = Vec::with_capacity(queue.count(device_type));
        for &guid in queue.guids(device_type) {
            match self.get_device_context(device_type, guid) {
                Ok(mut ctx) => infos.push(ctx.snapshot()?),
                Err(e) => log::warn!("skipping {} {}: {}", device_type, guid, e),
            }
        }
        Ok(infos)
    }

    pub fn list_all_devices(&self) -> XcoderResult<AllDevices> {
        let mut all = AllDevices::default();
        for device_type in DeviceType::XCODERS {
            all.devices[device_type.index()] = self.list_devices(device_type)?;
        }
        Ok(all)
    }

    /// Write the full record of every module, grouped by type.
    pub fn print_all_devices_capability<W: Write>(&self, out: &mut W) -> XcoderResult<()> {
        let all = self.list_all_devices()?;
        for (device_type, infos) in all.iter() {
            writeln!(out, "Num {}s: {}", device_type, infos.len())?;
            for info in infos {
                print_device_info(info, out)?;
            }
        }
        Ok(())
    }
}

/// Write one module's record in the classic `key: value` layout.
pub fn print_device_info<W: Write>(info: &DeviceInfo, out: &mut W) -> std::io::Result<()> {
    let type_name = info.device_type().map_or("Unknown", |t| match t {
        DeviceType::Decoder => "Decoder",
        DeviceType::Encoder | DeviceType::Upload => "Encoder",
        DeviceType::Scaler => "Scaler",
        DeviceType::Ai => "AI",
    });

    writeln!(out, "{} #{}", type_name, info.module_id)?;
    writeln!(out, "  DeviceID: {}", info.dev_name())?;
    writeln!(out, "  BlockID: {}", info.blk_name())?;
    writeln!(out, "  H/W ID: {}", info.hw_id)?;
    writeln!(out, "  Serial number: {}", info.serial_number())?;
    writeln!(out, "  Model number: {}", info.model_number())?;
    writeln!(out, "  F/W rev: {}", info.fw_rev_str())?;
    writeln!(out, "  NOR flash F/W rev: {}", info.fw_rev_nor_flash())?;
    writeln!(out, "  F/W loader (last ran): {}", info.fl_ver_last_ran())?;
    writeln!(out, "  F/W loader (NOR flash): {}", info.fl_ver_nor_flash())?;
    writeln!(
        out,
        "  F/W & S/W compatibility: {}",
        if info.fw_ver_compat_warning() {
            "no, possible missing features"
        } else {
            "yes"
        }
    )?;
    writeln!(out, "  F/W branch: {}", info.fw_branch_name())?;
    writeln!(out, "  F/W commit hash: {}", info.fw_commit_hash())?;
    writeln!(out, "  F/W commit time: {}", info.fw_commit_time())?;
    writeln!(out, "  F/W build time: {}", info.fw_build_time())?;
    writeln!(out, "  F/W build id: {}", info.fw_build_id())?;
    writeln!(out, "  MaxNumInstances: {}", info.max_instance_cnt)?;
    writeln!(out, "  ActiveNumInstances: {}", info.active_num_inst)?;
    writeln!(out, "  Max4KFps: {}", info.max_fps_4k)?;
    writeln!(out, "  CurrentLoad: {}", info.load)?;
    writeln!(out, "  ModelLoad: {}", info.model_load)?;
    writeln!(out, "  ReservedPixelRate: {}", info.xcode_load_pixel)?;

    for cap in info.capabilities() {
        let Some(codec) = cap.codec() else { continue };
        writeln!(out, "  {}Capabilities:", codec)?;
        writeln!(out, "    MaxResolution: {}x{}", cap.max_res_width, cap.max_res_height)?;
        writeln!(out, "    MinResolution: {}x{}", cap.min_res_width, cap.min_res_height)?;
        writeln!(out, "    Profiles: {}", cap.profiles())?;
        writeln!(out, "    level: {}", cap.level())?;
        writeln!(out, "    additional info: {}", cap.additional_info())?;
    }

    writeln!(out, "  num. s/w instances: {}", info.instances().len())?;
    for inst in info.instances() {
        writeln!(out, "      [id]: {}", inst.id)?;
        writeln!(
            out,
            "      status: {}",
            match inst.status() {
                SwInstanceStatus::Idle => "Idle",
                SwInstanceStatus::Active => "Active",
            }
        )?;
        writeln!(
            out,
            "      codec: {}",
            inst.codec().map_or("none", |c| c.as_str())
        )?;
        writeln!(out, "      width:  {}", inst.width)?;
        writeln!(out, "      height: {}", inst.height)?;
        writeln!(out, "      fps:    {}", inst.fps)?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Codec, SwInstance};

    #[test]
    fn prints_identity_capabilities_and_instances() {
        let mut info = DeviceInfo::new(DeviceType::Decoder, 3);
        info.set_dev_name("/dev/nvme0n1");
        info.load = 42;
        info.set_instances(&[SwInstance::new(
            7,
            SwInstanceStatus::Active,
            Some(Codec::H265),
            1920,
            1080,
            60,
        )]);

        let mut out = Vec::new();
        print_device_info(&info, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Decoder #3\n"));
        assert!(text.contains("  DeviceID: /dev/nvme0n1\n"));
        assert!(text.contains("  CurrentLoad: 42\n"));
        assert!(text.contains("  F/W & S/W compatibility: yes\n"));
        assert!(text.contains("      codec: H.265\n"));
        assert!(text.contains("num. s/w instances: 1"));
    }

    #[test]
    fn empty_listing() {
        let all = AllDevices::default();
        assert!(all.is_empty());
        assert_eq!(all.iter().count(), XCODER_TYPE_COUNT);
    }
}
