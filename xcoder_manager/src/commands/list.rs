//! Read-only views of the registry: summary table, full records, lookups.

use colored::*;
use std::io::Write;
use xcoder_core::{print_device_info, DeviceInfo, DeviceType, Registry, XcoderResult};

/// One table row per module of `device_type`, or of every type when `None`.
/// Returns how many modules were listed.
pub fn run_list<W: Write>(
    registry: &Registry,
    device_type: Option<DeviceType>,
    out: &mut W,
) -> XcoderResult<usize> {
    let types: Vec<DeviceType> = match device_type {
        Some(t) => vec![t.xcoder()],
        None => DeviceType::XCODERS.to_vec(),
    };

    let mut listed = 0;
    for device_type in types {
        let infos = registry.list_devices(device_type)?;
        writeln!(
            out,
            "{}",
            format!("{} ({})", device_type.as_str().to_uppercase(), infos.len())
                .cyan()
                .bold()
        )?;
        if infos.is_empty() {
            continue;
        }
        writeln!(
            out,
            "  {:<5} {:<16} {:>5} {:>6} {:>9} {:>14}  {}",
            "GUID", "DEVICE", "LOAD", "MODEL", "INST", "RESERVED", "FIRMWARE"
        )?;
        for info in &infos {
            write_row(info, out)?;
        }
        listed += infos.len();
    }
    Ok(listed)
}

fn write_row<W: Write>(info: &DeviceInfo, out: &mut W) -> std::io::Result<()> {
    writeln!(
        out,
        "  {:<5} {:<16} {:>5} {:>6} {:>9} {:>14}  {} ({})",
        info.module_id,
        info.dev_name(),
        info.load,
        info.model_load,
        format!("{}/{}", info.active_num_inst, info.max_instance_cnt),
        info.xcode_load_pixel,
        info.fw_rev_str(),
        info.fw_compat()
    )
}

/// Every record in full, grouped by type.
pub fn run_list_all<W: Write>(registry: &Registry, out: &mut W) -> XcoderResult<()> {
    registry.print_all_devices_capability(out)
}

/// Full record of one module.
pub fn run_info<W: Write>(
    registry: &Registry,
    device_type: DeviceType,
    guid: i32,
    out: &mut W,
) -> XcoderResult<()> {
    let info = registry.get_device_info(device_type, guid)?;
    print_device_info(&info, out)?;
    Ok(())
}

/// GUID of the `device_type` module on device `name`, if registered.
pub fn run_lookup<W: Write>(
    registry: &Registry,
    name: &str,
    device_type: DeviceType,
    out: &mut W,
) -> XcoderResult<Option<i32>> {
    let guid = registry.get_device_by_block_name(name, device_type)?;
    match guid {
        Some(guid) => writeln!(out, "{} {} on {}", device_type, guid, name)?,
        None => writeln!(out, "no {} registered on {}", device_type, name)?,
    }
    Ok(guid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use xcoder_core::backend::mock::{MockBackend, MockCard};
    use xcoder_core::{ResourceStore, RsrcConfig};

    fn seeded(cards: usize) -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let config = RsrcConfig {
            discovery_interval_ms: 10,
            ..RsrcConfig::with_rsrc_dir(dir.path())
        };
        let backend = MockBackend::new();
        for n in 0..cards {
            backend.plug(
                &format!("/dev/nvme{}n1", n),
                MockCard::transcoder(&format!("SN{}", n)),
            );
        }
        let store = ResourceStore::new(config.clone(), backend);
        store.init(true, Duration::from_secs(1)).unwrap();
        (dir, Registry::new(config))
    }

    fn render<F: FnOnce(&mut Vec<u8>)>(f: F) -> String {
        let mut out = Vec::new();
        f(&mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn lists_every_type() {
        let (_dir, registry) = seeded(2);
        let mut listed = 0;
        let text = render(|out| listed = run_list(&registry, None, out).unwrap());

        assert_eq!(listed, 8);
        for header in ["DECODER (2)", "ENCODER (2)", "SCALER (2)", "AI (2)"] {
            assert!(text.contains(header), "missing {header} in\n{text}");
        }
        assert!(text.contains("/dev/nvme0n1"));
        assert!(text.contains("/dev/nvme1n1"));
    }

    #[test]
    fn upload_lists_encoders() {
        let (_dir, registry) = seeded(1);
        let text = render(|out| {
            assert_eq!(run_list(&registry, Some(DeviceType::Upload), out).unwrap(), 1);
        });
        assert!(text.contains("ENCODER (1)"));
        assert!(!text.contains("DECODER"));
    }

    #[test]
    fn info_prints_the_record() {
        let (_dir, registry) = seeded(2);
        let text = render(|out| run_info(&registry, DeviceType::Decoder, 1, out).unwrap());
        assert!(text.starts_with("Decoder #1"));
        assert!(text.contains("DeviceID: /dev/nvme1n1"));
        assert!(text.contains("Serial number: SN1"));
    }

    #[test]
    fn info_rejects_unknown_guid() {
        let (_dir, registry) = seeded(1);
        let mut out = Vec::new();
        assert!(run_info(&registry, DeviceType::Decoder, 5, &mut out).is_err());
        assert!(run_info(&registry, DeviceType::Decoder, 200, &mut out).is_err());
    }

    #[test]
    fn looks_up_by_block_name() {
        let (_dir, registry) = seeded(2);
        let mut out = Vec::new();
        assert_eq!(
            run_lookup(&registry, "/dev/nvme1n1", DeviceType::Scaler, &mut out).unwrap(),
            Some(1)
        );
        assert_eq!(
            run_lookup(&registry, "/dev/nvme9n1", DeviceType::Scaler, &mut out).unwrap(),
            None
        );
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("scaler 1 on /dev/nvme1n1"));
        assert!(text.contains("no scaler registered on /dev/nvme9n1"));
    }

    #[test]
    fn list_all_groups_by_type() {
        let (_dir, registry) = seeded(1);
        let text = render(|out| run_list_all(&registry, out).unwrap());
        assert!(text.contains("Num decoders: 1"));
        assert!(text.contains("Num ais: 1"));
    }
}
