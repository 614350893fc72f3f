//! Live-load scans, module selection and the hardware availability check.

use super::ResourceStore;
use crate::backend::{DeviceBackend, OpenDevice, SessionError};
use crate::device::{capacity::job_pixels, Codec, DeviceContext, DeviceInfo, DeviceType};
use crate::error::{XcoderError, XcoderResult};
use crate::registry::{check_guid, move_to_end_of_pool, reserve, Allocation, DeviceQueue};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How [`ResourceStore::allocate_auto`] ranks candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocRule {
    /// Fewest active software instances.
    LeastInstance,
    /// Lowest load (model load for encoders).
    #[default]
    LeastLoad,
}

impl fmt::Display for AllocRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AllocRule::LeastInstance => "least_instance",
            AllocRule::LeastLoad => "least_load",
        })
    }
}

impl FromStr for AllocRule {
    type Err = XcoderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "least_instance" | "instance" => Ok(AllocRule::LeastInstance),
            "least_load" | "load" => Ok(AllocRule::LeastLoad),
            other => Err(XcoderError::invalid_input(format!(
                "unknown allocation rule '{}'",
                other
            ))),
        }
    }
}

/// The least loaded module that admitted a job.
#[derive(Debug, Clone)]
pub struct AvailableDevice {
    pub guid: i32,
    pub info: DeviceInfo,
}

/// Load metric a scan minimizes: encoders rank by the firmware's model load.
fn load_metric(device_type: DeviceType, info: &DeviceInfo) -> i32 {
    if device_type.xcoder() == DeviceType::Encoder {
        info.model_load
    } else {
        info.load
    }
}

/// One scanned module.
struct Candidate {
    ctx: DeviceContext,
    info: DeviceInfo,
}

impl<B: DeviceBackend> ResourceStore<B> {
    /// Re-query every module of a type whose record opens and whose live
    /// query succeeds. Others are skipped and logged. Caller holds the pool
    /// lock.
    fn scan(&self, queue: &DeviceQueue, device_type: DeviceType) -> Vec<Candidate> {
        let mut candidates = Vec::with_capacity(queue.count(device_type));
        let mut skipped = 0;

        for &guid in queue.guids(device_type) {
            let scanned = self
                .registry
                .get_device_context(device_type, guid)
                .and_then(|mut ctx| {
                    self.refresh_module(&mut ctx)?;
                    let info = ctx.snapshot()?;
                    Ok(Candidate { ctx, info })
                });
            match scanned {
                Ok(candidate) if candidate.info.is_eligible() => candidates.push(candidate),
                Ok(_) => {
                    log::debug!("{} {}: firmware incompatible, skipped", device_type, guid);
                    skipped += 1;
                }
                Err(e) => {
                    log::warn!("{} {}: {}, skipped", device_type, guid, e);
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            log::info!(
                "{} scan: {} usable, {} skipped",
                device_type,
                candidates.len(),
                skipped
            );
        }
        candidates
    }

    /// Least loaded module of a type that can take a `width`x`height`@`fps`
    /// job, or `None` when nothing fits.
    pub fn get_available_device(
        &self,
        width: u32,
        height: u32,
        fps: u32,
        codec: Codec,
        device_type: DeviceType,
    ) -> XcoderResult<Option<AvailableDevice>> {
        let device_type = device_type.xcoder();

        let best = {
            let mut pool = self.registry.get_device_pool()?;
            let queue = pool.lock()?;
            let mut best: Option<Candidate> = None;
            for candidate in self.scan(&queue, device_type) {
                let key = (load_metric(device_type, &candidate.info), candidate.info.active_num_inst);
                let better = match &best {
                    None => true,
                    Some(b) => key < (load_metric(device_type, &b.info), b.info.active_num_inst),
                };
                if better {
                    best = Some(candidate);
                }
            }
            best
        };

        let Some(Candidate { info, .. }) = best else {
            log::info!("no {} available", device_type);
            return Ok(None);
        };

        if !self.admits(&info, device_type, codec, width, height, fps) {
            return Ok(None);
        }
        Ok(Some(AvailableDevice {
            guid: info.module_id,
            info,
        }))
    }

    /// Capacity check of a new job against one module's snapshot.
    ///
    /// Decoders and encoders must fit the job next to what is already
    /// reserved. Other engines keep no reservations and only require the job
    /// itself to fit the reference. A pixel rate too large for a u64 never
    /// fits.
    fn admits(
        &self,
        info: &DeviceInfo,
        device_type: DeviceType,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> bool {
        let reference = self.registry.reference_table().get(device_type, codec);
        if reference.is_zero() {
            log::debug!("{} has no reference capacity for {}", device_type, codec);
            return false;
        }

        let (Some(total), Some(job)) = (reference.total_pixels(), job_pixels(width, height, fps))
        else {
            log::debug!(
                "{} {}: {}x{}@{} overflows the pixel rate",
                device_type,
                info.module_id,
                width,
                height,
                fps
            );
            return false;
        };

        let needed = match device_type {
            DeviceType::Encoder | DeviceType::Decoder => info.xcode_load_pixel.checked_add(job),
            _ => Some(job),
        };
        match needed {
            Some(needed) if needed <= total => true,
            _ => {
                log::debug!(
                    "{} {}: {}x{}@{} does not fit, reserved {} of {}",
                    device_type,
                    info.module_id,
                    width,
                    height,
                    fps,
                    info.xcode_load_pixel,
                    total
                );
                false
            }
        }
    }

    /// Pick a module by `rule`, reserve the job on it and requeue it at the
    /// back of the pool. No capacity check is made.
    pub fn allocate_auto(
        &self,
        device_type: DeviceType,
        rule: AllocRule,
        codec: Codec,
        width: u32,
        height: u32,
        fps: u32,
    ) -> XcoderResult<Allocation> {
        let device_type = device_type.xcoder();
        let reference = self.registry.reference_table().get(device_type, codec);
        if device_type == DeviceType::Encoder && reference.is_zero() {
            return Err(XcoderError::invalid_input(format!(
                "no reference capacity for {} {}",
                device_type, codec
            )));
        }

        let mut pool = self.registry.get_device_pool()?;
        let mut queue = pool.lock()?;

        let mut best: Option<Candidate> = None;
        for candidate in self.scan(&queue, device_type) {
            let key = rank(rule, device_type, &candidate.info);
            if best.as_ref().map_or(true, |b| key < rank(rule, device_type, &b.info)) {
                best = Some(candidate);
            }
        }
        let Some(Candidate { mut ctx, .. }) = best else {
            return Err(XcoderError::not_found(format!("no {} available", device_type)));
        };

        let reserved_load = if device_type == DeviceType::Encoder {
            let job = job_pixels(width, height, fps).ok_or_else(|| {
                XcoderError::invalid_input(format!(
                    "{}x{}@{} overflows the pixel rate",
                    width, height, fps
                ))
            })?;
            reserve(&mut ctx, job)?;
            job
        } else {
            0
        };

        let guid = ctx.guid();
        move_to_end_of_pool(device_type, guid, &mut queue);
        log::debug!("allocated {} {} by {}", device_type, guid, rule);

        Ok(Allocation {
            context: ctx,
            reserved_load,
        })
    }

    /// Check whether a module can open a session right now.
    ///
    /// Opens the device, refreshes the module's live load, then opens and
    /// closes a trial session. While firmware reports recovery the session is
    /// retried up to `hw_check_attempts` times; any other failure is final.
    pub fn check_hw_available(&self, guid: i32, device_type: DeviceType) -> bool {
        match self.try_check_hw(guid, device_type) {
            Ok(available) => available,
            Err(e) => {
                log::warn!("{} {} unavailable: {}", device_type, guid, e);
                false
            }
        }
    }

    fn try_check_hw(&self, guid: i32, device_type: DeviceType) -> XcoderResult<bool> {
        check_guid(guid)?;
        let device_type = device_type.xcoder();

        let mut pool = self.registry.get_device_pool()?;
        let _queue = pool.lock()?;
        let mut ctx = self.registry.get_device_context(device_type, guid)?;
        self.refresh_module(&mut ctx)?;

        let info = ctx.snapshot()?;
        let device = OpenDevice::open(&self.backend, &info.dev_name())?;
        let config = self.registry.config();

        for attempt in 1..=config.hw_check_attempts {
            match self.backend.open_session(device.handle(), info.hw_id, device_type) {
                Ok(()) => {
                    self.backend
                        .close_session(device.handle(), info.hw_id, device_type);
                    return Ok(true);
                }
                Err(SessionError::Recovering) if attempt < config.hw_check_attempts => {
                    log::debug!(
                        "{} {}: firmware recovering, retry {}/{}",
                        device_type,
                        guid,
                        attempt,
                        config.hw_check_attempts
                    );
                    std::thread::sleep(config.hw_check_backoff());
                }
                Err(SessionError::Recovering) => {
                    return Err(XcoderError::Transient(format!(
                        "still recovering after {} attempts",
                        attempt
                    )));
                }
                Err(e) => return Err(XcoderError::backend(info.dev_name(), e.to_string())),
            }
        }
        Ok(false)
    }
}

fn rank(rule: AllocRule, device_type: DeviceType, info: &DeviceInfo) -> i64 {
    match rule {
        AllocRule::LeastInstance => i64::from(info.active_num_inst),
        AllocRule::LeastLoad => i64::from(load_metric(device_type, info)),
    }
}
