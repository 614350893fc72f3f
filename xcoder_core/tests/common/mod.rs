//! Shared test utilities for xcoder_core integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use xcoder_core::backend::mock::{MockBackend, MockCard};
use xcoder_core::{ResourceStore, RsrcConfig};

pub const INIT_TIMEOUT: Duration = Duration::from_secs(2);

pub type TestStore = ResourceStore<Arc<MockBackend>>;

/// Install a test logger once per process; `RUST_LOG=debug` shows the traces.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config rooted in `dir` with short waits.
pub fn test_config(dir: &TempDir) -> RsrcConfig {
    RsrcConfig {
        discovery_interval_ms: 20,
        pool_lock_timeout_ms: 5000,
        lock_file_backoff_ms: 10,
        hw_check_backoff_ms: 5,
        ..RsrcConfig::with_rsrc_dir(dir.path())
    }
}

/// Device path of card `n`.
pub fn nvme(n: usize) -> String {
    format!("/dev/nvme{}n1", n)
}

/// Backend with `cards` transcoders at `/dev/nvme0n1`, `/dev/nvme1n1`, ...
pub fn backend_with(cards: usize) -> Arc<MockBackend> {
    let backend = MockBackend::new();
    for n in 0..cards {
        backend.plug(&nvme(n), MockCard::transcoder(&format!("SN{:04}", n)));
    }
    Arc::new(backend)
}

/// A store in a fresh directory, not yet initialized.
pub fn store(backend: Arc<MockBackend>) -> (TempDir, TestStore) {
    init_logging();
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ResourceStore::new(test_config(&dir), backend);
    (dir, store)
}

/// A store in a fresh directory, initialized over `cards` transcoders.
pub fn initialized_store(cards: usize) -> (TempDir, TestStore) {
    let (dir, store) = store(backend_with(cards));
    store.init(true, INIT_TIMEOUT).expect("init");
    (dir, store)
}

/// A second "process" on the same directory and backend.
pub fn peer(dir: &TempDir, store: &TestStore) -> TestStore {
    ResourceStore::new(test_config(dir), Arc::clone(store.backend()))
}

/// Current queue of one type, front = least recently allocated.
pub fn queued(store: &TestStore, device_type: xcoder_core::DeviceType) -> Vec<i32> {
    let mut pool = store.registry().get_device_pool().expect("pool");
    let queue = pool.lock().expect("pool lock");
    let guids = queue.guids(device_type).to_vec();
    guids
}

/// Reserved pixel rate of one module.
pub fn reserved(store: &TestStore, device_type: xcoder_core::DeviceType, guid: i32) -> u64 {
    store
        .registry()
        .get_device_info(device_type, guid)
        .expect("device info")
        .xcode_load_pixel
}
