//! Registration, removal, refresh and self-healing of the shared registry.

mod common;

use common::*;
use std::time::Duration;
use xcoder_core::backend::mock::MockCard;
use xcoder_core::memory::CrossProcessMutex;
use xcoder_core::registry::{DeviceQueue, EMPTY_SLOT};
use xcoder_core::{AllocRule, Codec, DeviceType, FwCompatibility, XcoderError};

#[test]
fn init_registers_one_module_per_engine_type() {
    let (dir, store) = initialized_store(2);

    for device_type in DeviceType::XCODERS {
        assert_eq!(queued(&store, device_type), vec![0, 1], "{}", device_type);
    }

    let encoders = store.registry().list_devices(DeviceType::Encoder).unwrap();
    assert_eq!(encoders.len(), 2);
    assert_eq!(encoders[0].dev_name(), nvme(0));
    assert_eq!(encoders[1].dev_name(), nvme(1));
    assert_eq!(encoders[1].serial_number(), "SN0001");
    assert_eq!(encoders[0].fw_compat(), FwCompatibility::Full);

    let paths = store.registry().paths();
    assert!(paths.device_shm(DeviceType::Ai, 1).exists());
    assert!(paths.device_lock(DeviceType::Scaler, 0).exists());
    for device_type in DeviceType::XCODERS {
        assert!(paths.retry_lock(device_type).exists());
    }
    assert!(dir.path().join("NI_SHM_CODERS").exists());
    assert!(dir.path().join("NI_LCK_CODERS").exists());
    assert_eq!(store.backend().open_handles(), 0);
}

#[test]
fn second_init_keeps_a_valid_registry() {
    let (dir, store) = initialized_store(2);
    let job = store
        .registry()
        .allocate_direct(DeviceType::Encoder, 0, Codec::H264, 1920, 1080, 30)
        .unwrap();
    assert_eq!(queued(&store, DeviceType::Encoder), vec![1, 0]);

    let other = peer(&dir, &store);
    other.init(true, INIT_TIMEOUT).unwrap();

    // a rebuild would have reset both the order and the reservation
    assert_eq!(queued(&store, DeviceType::Encoder), vec![1, 0]);
    assert_eq!(reserved(&store, DeviceType::Encoder, 0), 1920 * 1080 * 30);
    job.release().unwrap();
}

#[test]
fn init_times_out_without_devices() {
    let (_dir, store) = store(backend_with(0));
    let err = store.init(true, Duration::from_millis(60)).unwrap_err();
    assert!(matches!(err, XcoderError::Timeout(_)));
    assert!(!store.registry().paths().pool_shm().exists());
}

#[test]
fn init_waits_for_a_late_card() {
    let (_dir, store) = store(backend_with(0));
    let backend = std::sync::Arc::clone(store.backend());
    let plugger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        backend.plug(&nvme(0), MockCard::transcoder("LATE"));
    });

    store.init(true, Duration::from_secs(5)).unwrap();
    plugger.join().unwrap();
    assert_eq!(queued(&store, DeviceType::Decoder), vec![0]);
}

#[test]
fn firmware_compatibility_gates_registration() {
    let (_dir, store) = store(backend_with(0));
    let backend = store.backend();
    backend.plug(&nvme(0), MockCard::with_fw("FULL", *b"40064rcB"));
    backend.plug(&nvme(1), MockCard::with_fw("OLDMAJOR", *b"40054rcB"));
    backend.plug(&nvme(2), MockCard::with_fw("NEWMINOR", *b"40065rcB"));
    backend.plug(&nvme(3), MockCard::not_a_transcoder("SSD"));

    store.init(true, INIT_TIMEOUT).unwrap();

    let decoders = store.registry().list_devices(DeviceType::Decoder).unwrap();
    let names: Vec<_> = decoders.iter().map(|d| d.dev_name().into_owned()).collect();
    assert_eq!(names, vec![nvme(0), nvme(2)]);
    assert!(!decoders[0].fw_ver_compat_warning());
    assert!(decoders[1].fw_ver_compat_warning());
    assert_eq!(decoders[1].fw_compat(), FwCompatibility::Partial);
}

#[test]
fn incompatible_firmware_registers_when_not_matching_but_is_never_allocated() {
    let (_dir, store) = store(backend_with(0));
    store
        .backend()
        .plug(&nvme(0), MockCard::with_fw("OLDMAJOR", *b"40054rcB"));

    store.init(false, INIT_TIMEOUT).unwrap();
    let info = store.registry().get_device_info(DeviceType::Encoder, 0).unwrap();
    assert_eq!(info.fw_compat(), FwCompatibility::Incompatible);

    let err = store
        .allocate_auto(DeviceType::Encoder, AllocRule::LeastLoad, Codec::H264, 1280, 720, 30)
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn cards_without_an_engine_type_skip_that_queue() {
    let (_dir, store) = store(backend_with(0));
    store
        .backend()
        .plug(&nvme(0), MockCard::transcoder("NOAI").without(DeviceType::Ai));
    store.init(true, INIT_TIMEOUT).unwrap();

    assert_eq!(queued(&store, DeviceType::Encoder), vec![0]);
    assert!(queued(&store, DeviceType::Ai).is_empty());
}

#[test]
fn removing_a_device_compacts_and_keeps_guids() {
    let (_dir, store) = initialized_store(5);

    let removed = store.registry().remove_device(&nvme(2)).unwrap();
    assert_eq!(removed, 4);

    let mut pool = store.registry().get_device_pool().unwrap();
    let queue = pool.lock().unwrap();
    assert_eq!(queue.count(DeviceType::Decoder), 4);
    assert_eq!(queue.guids(DeviceType::Decoder), &[0, 1, 3, 4]);
    assert!(queue.slots(DeviceType::Decoder)[4..]
        .iter()
        .all(|&g| g == EMPTY_SLOT));
    queue.validate().unwrap();
    drop(queue);

    let paths = store.registry().paths();
    assert!(!paths.device_shm(DeviceType::Decoder, 2).exists());
    assert!(!paths.device_lock(DeviceType::Decoder, 2).exists());
    assert!(paths.device_shm(DeviceType::Decoder, 3).exists());
}

#[test]
fn removing_an_unknown_device_is_a_no_op() {
    let (_dir, store) = initialized_store(1);
    assert_eq!(store.registry().remove_device("/dev/nvme9n1").unwrap(), 0);
    assert_eq!(queued(&store, DeviceType::Encoder), vec![0]);
}

#[test]
fn registry_invariant_holds_across_add_and_remove() {
    let (_dir, store) = initialized_store(4);
    let check = || {
        let mut pool = store.registry().get_device_pool().unwrap();
        pool.lock().unwrap().validate().unwrap();
    };

    store.registry().remove_device(&nvme(1)).unwrap();
    check();
    assert_eq!(store.add_device(&nvme(1), true).unwrap(), 4);
    check();
    store.registry().remove_device(&nvme(0)).unwrap();
    check();
    store.backend().plug(&nvme(7), MockCard::transcoder("SN0007"));
    store.add_device(&nvme(7), true).unwrap();
    check();

    assert_eq!(queued(&store, DeviceType::Decoder), vec![2, 3, 4, 5]);
    let info = store.registry().get_device_info(DeviceType::Decoder, 4).unwrap();
    assert_eq!(info.dev_name(), nvme(1));
}

#[test]
fn add_device_rejects_duplicates_and_strangers() {
    let (_dir, store) = initialized_store(1);

    let dup = store.add_device(&nvme(0), true).unwrap_err();
    assert!(matches!(dup, XcoderError::AlreadyExists(_)));

    let missing = store.add_device("/dev/nvme4n1", true).unwrap_err();
    assert!(matches!(missing, XcoderError::Backend { .. }));

    store
        .backend()
        .plug(&nvme(4), MockCard::not_a_transcoder("SSD"));
    assert!(store.add_device(&nvme(4), true).is_err());
    assert_eq!(queued(&store, DeviceType::Decoder), vec![0]);
    assert_eq!(store.backend().open_handles(), 0);
}

#[test]
fn refresh_follows_hot_plug() {
    let (_dir, store) = initialized_store(2);

    store.backend().unplug(&nvme(0));
    store.backend().plug(&nvme(5), MockCard::transcoder("SN0005"));

    let report = store.refresh(true).unwrap();
    assert_eq!(report.removed, vec![nvme(0)]);
    assert_eq!(report.added, vec![nvme(5)]);

    // untouched device keeps its guid, the new one gets a fresh guid
    assert_eq!(queued(&store, DeviceType::Encoder), vec![1, 2]);
    assert_eq!(
        store
            .registry()
            .get_device_by_block_name(&nvme(5), DeviceType::Encoder)
            .unwrap(),
        Some(2)
    );
}

#[test]
fn refresh_with_unchanged_devices_does_nothing() {
    let (_dir, store) = initialized_store(3);
    let opens = store.backend().opens();

    let report = store.refresh(true).unwrap();
    assert!(report.is_empty());
    assert_eq!(store.backend().opens(), opens);
    assert_eq!(queued(&store, DeviceType::Scaler), vec![0, 1, 2]);
}

#[test]
fn refresh_survives_devices_that_cannot_be_removed() {
    use std::os::unix::fs::PermissionsExt;

    // root ignores directory permissions
    if unsafe { libc::geteuid() } == 0 {
        return;
    }

    let (dir, store) = initialized_store(2);
    store.backend().unplug(&nvme(0));
    store.backend().plug(&nvme(2), MockCard::transcoder("SN0002"));

    let set_mode = |mode| {
        std::fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(mode)).unwrap()
    };
    set_mode(0o555);
    let blocked = store.refresh(true);
    let removal = store.registry().remove_device(&nvme(0));
    set_mode(0o755);

    let report = blocked.unwrap();
    assert!(report.removed.is_empty());
    assert!(report.added.is_empty());
    assert_eq!(report.failed, vec![nvme(0), nvme(2)]);
    assert!(removal.is_err());

    // nothing was deleted, so every queued record still opens
    for device_type in DeviceType::XCODERS {
        assert_eq!(queued(&store, device_type), vec![0, 1]);
        for guid in [0, 1] {
            assert!(store.registry().get_device_info(device_type, guid).is_ok());
        }
    }

    let report = store.refresh(true).unwrap();
    assert_eq!(report.removed, vec![nvme(0)]);
    assert_eq!(report.added, vec![nvme(2)]);
    assert!(report.failed.is_empty());
    assert_eq!(queued(&store, DeviceType::Decoder), vec![1, 2]);
}

#[test]
fn corrupted_pool_is_rebuilt_on_init() {
    let (dir, store) = initialized_store(2);
    let pool_path = store.registry().paths().pool_shm();
    std::fs::write(&pool_path, vec![0u8; std::mem::size_of::<DeviceQueue>()]).unwrap();
    assert!(matches!(
        store.registry().get_device_pool().unwrap_err(),
        XcoderError::Corrupted(_)
    ));

    peer(&dir, &store).init(true, INIT_TIMEOUT).unwrap();
    assert_eq!(queued(&store, DeviceType::Decoder), vec![0, 1]);
}

#[test]
fn truncated_pool_is_rebuilt_on_init() {
    let (dir, store) = initialized_store(1);
    std::fs::write(store.registry().paths().pool_shm(), b"short").unwrap();

    peer(&dir, &store).init(true, INIT_TIMEOUT).unwrap();
    assert_eq!(queued(&store, DeviceType::Encoder), vec![0]);
}

#[test]
fn missing_module_record_triggers_rebuild() {
    let (dir, store) = initialized_store(2);
    std::fs::remove_file(store.registry().paths().device_shm(DeviceType::Encoder, 1)).unwrap();

    peer(&dir, &store).init(true, INIT_TIMEOUT).unwrap();
    let info = store.registry().get_device_info(DeviceType::Encoder, 1).unwrap();
    assert_eq!(info.dev_name(), nvme(1));
}

#[test]
fn device_count_mismatch_triggers_rebuild() {
    let (dir, store) = initialized_store(2);
    store
        .backend()
        .plug(&nvme(2), MockCard::transcoder("SN0002"));

    peer(&dir, &store).init(true, INIT_TIMEOUT).unwrap();
    assert_eq!(queued(&store, DeviceType::Ai), vec![0, 1, 2]);
}

#[test]
fn remove_all_devices_leaves_no_shared_objects() {
    let (dir, store) = initialized_store(2);
    std::fs::write(dir.path().join("unrelated.txt"), b"keep").unwrap();

    assert_eq!(store.registry().remove_all_devices().unwrap(), 8);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("NI_"))
        .collect();
    assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
    assert!(dir.path().join("unrelated.txt").exists());

    let err = store.registry().get_device_pool().unwrap_err();
    assert!(matches!(err, XcoderError::ResourceUnavailable(_)));
}

#[test]
fn lookups_by_guid_and_name() {
    let (_dir, store) = initialized_store(2);
    let registry = store.registry();

    assert_eq!(
        registry.get_device_by_block_name(&nvme(1), DeviceType::Scaler).unwrap(),
        Some(1)
    );
    assert_eq!(
        registry.get_device_by_block_name("/dev/sda", DeviceType::Scaler).unwrap(),
        None
    );

    let err = registry.get_device_context(DeviceType::Encoder, 128).unwrap_err();
    assert!(matches!(err, XcoderError::InvalidInput(_)));
    let err = registry.get_device_context(DeviceType::Encoder, 7).unwrap_err();
    assert!(matches!(err, XcoderError::ResourceUnavailable(_)));

    let all = registry.list_all_devices().unwrap();
    assert_eq!(all.total(), 8);
    assert_eq!(all.get(DeviceType::Upload).len(), 2);
}

#[test]
fn retry_lock_is_exclusive_until_dropped() {
    let (_dir, store) = initialized_store(1);
    let guard = store.registry().lock_and_open(DeviceType::Decoder).unwrap();

    let other = CrossProcessMutex::open(&store.registry().paths().retry_lock(DeviceType::Decoder)).unwrap();
    assert!(other.try_lock().unwrap().is_none());

    guard.unlock();
    assert!(other.try_lock().unwrap().is_some());
}

#[test]
fn capability_report_lists_every_module() {
    let (_dir, store) = initialized_store(1);
    let mut out = Vec::new();
    store.registry().print_all_devices_capability(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("Num decoders: 1"));
    assert!(text.contains("Num ais: 1"));
    assert!(text.contains("Encoder #0"));
    assert!(text.contains("  DeviceID: /dev/nvme0n1"));
    assert!(text.contains("AV1Capabilities"));
}
