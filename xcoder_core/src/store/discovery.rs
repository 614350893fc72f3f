//! Discovery, registration and self-healing of the shared registry.

use super::ResourceStore;
use crate::backend::{DeviceBackend, DeviceCapability, OpenDevice};
use crate::device::{is_fw_compat, DeviceContext, DeviceInfo, DeviceType, FwCompatibility, XCODER_TYPE_COUNT};
use crate::error::{XcoderError, XcoderResult};
use crate::registry::{DevicePool, DeviceQueue};
use std::cmp::Ordering;
use std::time::{Duration, Instant};

/// Outcome of a [`ResourceStore::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Devices that should have been added or removed but were not; the next
    /// refresh tries them again.
    pub failed: Vec<String>,
}

impl RefreshReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.failed.is_empty()
    }
}

/// Diff `registered` against `present`, removing the vanished and adding the
/// new. A failure on one device is logged and does not stop the others.
fn reconcile(
    registered: &[String],
    present: &[String],
    mut remove: impl FnMut(&str) -> XcoderResult<usize>,
    mut add: impl FnMut(&str) -> XcoderResult<usize>,
) -> RefreshReport {
    let mut report = RefreshReport::default();
    for path in registered.iter().filter(|p| !present.contains(p)) {
        log::info!("{} disappeared, removing", path);
        match remove(path) {
            Ok(_) => report.removed.push(path.clone()),
            Err(e) => {
                log::warn!("{} not removed: {}", path, e);
                report.failed.push(path.clone());
            }
        }
    }
    for path in present.iter().filter(|p| !registered.contains(p)) {
        log::info!("{} appeared, adding", path);
        match add(path) {
            Ok(_) => report.added.push(path.clone()),
            Err(e) => {
                log::warn!("{} not added: {}", path, e);
                report.failed.push(path.clone());
            }
        }
    }
    report
}

/// Sort device paths with embedded numbers compared by value, so
/// `/dev/nvme2n1` comes before `/dev/nvme10n1`.
pub fn sort_device_names(names: &mut [String]) {
    names.sort_by(|a, b| natural_cmp(a, b));
}

fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    loop {
        match (a.first(), b.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let (na, ra) = split_digits(a);
                let (nb, rb) = split_digits(b);
                // strip leading zeros, then a longer run is the larger number
                let ta = trim_zeros(na);
                let tb = trim_zeros(nb);
                let ord = ta.len().cmp(&tb.len()).then_with(|| ta.cmp(tb));
                if ord != Ordering::Equal {
                    return ord;
                }
                a = ra;
                b = rb;
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(y);
                }
                a = &a[1..];
                b = &b[1..];
            }
        }
    }
}

fn split_digits(s: &[u8]) -> (&[u8], &[u8]) {
    let end = s.iter().position(|c| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(end)
}

fn trim_zeros(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&c| c != b'0').unwrap_or(s.len());
    &s[start..]
}

/// Engine counts a set of devices should contribute to the registry.
type TypeCounts = [usize; XCODER_TYPE_COUNT];

impl<B: DeviceBackend> ResourceStore<B> {
    /// Devices present right now, in numeric order.
    pub fn enumerate_devices(&self) -> XcoderResult<Vec<String>> {
        let mut names = self.backend.enumerate_devices()?;
        sort_device_names(&mut names);
        Ok(names)
    }

    /// Build the shared registry, or check the one already there.
    ///
    /// Waits for at least one device, polling every `discovery_interval`;
    /// a zero `timeout` waits forever. An existing pool that fails validation
    /// is purged and rebuilt once.
    pub fn init(&self, should_match_fw_rev: bool, timeout: Duration) -> XcoderResult<()> {
        let devices = self.wait_for_devices(timeout)?;

        match self.create_pool(&devices, should_match_fw_rev) {
            Ok(_) => log::info!("created device pool with {} device(s)", devices.len()),
            Err(XcoderError::AlreadyExists(_)) => {
                match self.validate_pool(&devices, should_match_fw_rev) {
                    Ok(()) => log::debug!("existing device pool is valid"),
                    Err(e) => {
                        log::error!("device pool failed validation, rebuilding: {}", e);
                        let purged = self.registry.paths().purge()?;
                        log::info!("purged {} shared object(s)", purged);
                        match self.create_pool(&devices, should_match_fw_rev) {
                            Ok(_) => log::info!("rebuilt device pool"),
                            // another process rebuilt it in between
                            Err(XcoderError::AlreadyExists(_)) => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
            }
            Err(e) => return Err(e),
        }

        self.registry.create_retry_locks()
    }

    fn wait_for_devices(&self, timeout: Duration) -> XcoderResult<Vec<String>> {
        let start = Instant::now();
        let interval = self.registry.config().discovery_interval();
        loop {
            match self.enumerate_devices() {
                Ok(devices) if !devices.is_empty() => return Ok(devices),
                Ok(_) => log::info!("no transcoder found yet, waiting"),
                Err(e) => log::warn!("device enumeration failed: {}", e),
            }

            let elapsed = start.elapsed();
            if !timeout.is_zero() && elapsed >= timeout {
                return Err(XcoderError::Timeout(format!(
                    "no transcoder found within {:?}",
                    timeout
                )));
            }
            let pause = if timeout.is_zero() {
                interval
            } else {
                interval.min(timeout - elapsed)
            };
            std::thread::sleep(pause);
        }
    }

    fn create_pool(&self, devices: &[String], should_match_fw_rev: bool) -> XcoderResult<DevicePool> {
        DevicePool::create(self.registry.paths(), |queue| {
            for path in devices {
                if let Err(e) = self.register_device(queue, path, should_match_fw_rev) {
                    log::warn!("{} not registered: {}", path, e);
                }
            }
            Ok(())
        })
    }

    /// Check an existing pool against the devices present now.
    fn validate_pool(&self, devices: &[String], should_match_fw_rev: bool) -> XcoderResult<()> {
        let expected = self.expected_counts(devices, should_match_fw_rev);

        let mut pool = self.registry.get_device_pool()?;
        let queue = pool.lock()?;
        queue.validate()?;

        for device_type in DeviceType::XCODERS {
            let count = queue.count(device_type);
            if count != expected[device_type.index()] {
                return Err(XcoderError::corrupted(format!(
                    "{} count {} but {} present",
                    device_type,
                    count,
                    expected[device_type.index()]
                )));
            }
            for &guid in queue.guids(device_type) {
                DeviceContext::open(self.registry.paths(), device_type, guid)
                    .map_err(|e| XcoderError::corrupted(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn expected_counts(&self, devices: &[String], should_match_fw_rev: bool) -> TypeCounts {
        let mut counts = TypeCounts::default();
        for path in devices {
            let capability = match self.inspect(path, should_match_fw_rev) {
                Ok((capability, _)) => capability,
                Err(e) => {
                    log::debug!("{} not counted: {}", path, e);
                    continue;
                }
            };
            for device_type in DeviceType::XCODERS {
                if capability.engine(device_type).count > 0 {
                    counts[device_type.index()] += 1;
                }
            }
        }
        counts
    }

    /// Open a device and decide whether it may be registered.
    fn inspect(
        &self,
        path: &str,
        should_match_fw_rev: bool,
    ) -> XcoderResult<(DeviceCapability, FwCompatibility)> {
        let device = OpenDevice::open(&self.backend, path)?;
        let capability = self.backend.query_capability(device.handle())?;

        if !capability.is_xcoder {
            return Err(XcoderError::Unsupported(format!("{} is not a transcoder", path)));
        }

        let compat = is_fw_compat(&capability.fw_rev);
        match compat {
            FwCompatibility::Incompatible if should_match_fw_rev => {
                return Err(XcoderError::Unsupported(format!(
                    "{} firmware {} is incompatible with this library",
                    path,
                    String::from_utf8_lossy(&capability.fw_rev)
                )));
            }
            FwCompatibility::Partial => log::warn!(
                "{} firmware {} is only partially compatible, some features may be missing",
                path,
                String::from_utf8_lossy(&capability.fw_rev)
            ),
            _ => {}
        }
        Ok((capability, compat))
    }

    /// Register one device into a queue the caller holds locked.
    fn register_device(
        &self,
        queue: &mut DeviceQueue,
        path: &str,
        should_match_fw_rev: bool,
    ) -> XcoderResult<usize> {
        if self.registry.registered_devices_locked(queue)?.iter().any(|p| p == path) {
            return Err(XcoderError::AlreadyExists(path.to_string()));
        }

        let (capability, compat) = self.inspect(path, should_match_fw_rev)?;
        let types: Vec<DeviceType> = DeviceType::XCODERS
            .into_iter()
            .filter(|&t| capability.engine(t).count > 0)
            .collect();

        if let Some(full) = types.iter().find(|&&t| queue.is_full(t)) {
            return Err(XcoderError::unavailable(format!(
                "{} registry is full, cannot add {}",
                full, path
            )));
        }

        let mut added: Vec<(DeviceType, i32)> = Vec::with_capacity(types.len());
        for device_type in types {
            let result = self.register_module(queue, path, device_type, &capability, compat);
            match result {
                Ok(guid) => added.push((device_type, guid)),
                Err(e) => {
                    self.rollback(queue, &added);
                    return Err(e);
                }
            }
        }

        log::info!("registered {} ({} module(s))", path, added.len());
        Ok(added.len())
    }

    fn register_module(
        &self,
        queue: &mut DeviceQueue,
        path: &str,
        device_type: DeviceType,
        capability: &DeviceCapability,
        compat: FwCompatibility,
    ) -> XcoderResult<i32> {
        let guid = queue.allocate_guid(device_type).ok_or_else(|| {
            XcoderError::unavailable(format!("no free {} guid", device_type))
        })?;

        let mut info = DeviceInfo::new(device_type, guid);
        info.fill_identity(path, capability, compat);
        info.fill_engine(capability.engine(device_type));

        DeviceContext::create(self.registry.paths(), &info)?;
        if let Err(e) = queue.push(device_type, guid) {
            DeviceContext::remove_objects(self.registry.paths(), device_type, guid)?;
            return Err(e);
        }
        log::info!("{} {} -> {} (hw {})", path, device_type, guid, info.hw_id);
        Ok(guid)
    }

    fn rollback(&self, queue: &mut DeviceQueue, added: &[(DeviceType, i32)]) {
        for &(device_type, guid) in added {
            queue.remove_guids(device_type, &[guid]);
            if let Err(e) = DeviceContext::remove_objects(self.registry.paths(), device_type, guid) {
                log::error!("cannot remove {} {}: {}", device_type, guid, e);
            }
        }
    }

    /// Register a hot-plugged device. Returns the number of modules added.
    pub fn add_device(&self, path: &str, should_match_fw_rev: bool) -> XcoderResult<usize> {
        let mut pool = self.registry.get_device_pool()?;
        let mut queue = pool.lock()?;
        let added = self.register_device(&mut queue, path, should_match_fw_rev)?;
        queue.flush();
        Ok(added)
    }

    /// Reconcile the registry with the devices present now: remove the
    /// vanished, add the new, leave the rest (and their GUIDs) untouched.
    pub fn refresh(&self, should_match_fw_rev: bool) -> XcoderResult<RefreshReport> {
        let registered = self.registry.registered_devices()?;
        let present = self.enumerate_devices()?;

        Ok(reconcile(
            &registered,
            &present,
            |path| self.registry.remove_device(path),
            |path| self.add_device(path, should_match_fw_rev),
        ))
    }
}
