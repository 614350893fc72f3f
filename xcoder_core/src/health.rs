//! Folding live firmware reports into the shared records.

use crate::backend::LiveLoad;
use crate::device::{DeviceContext, DeviceInfo, SwInstance};
use crate::error::XcoderResult;

/// Copy a live report into a record the caller already holds locked.
pub(crate) fn apply_live_load(info: &mut DeviceInfo, live: &LiveLoad) {
    info.load = live.load;
    info.model_load = live.model_load;
    info.active_num_inst = live.active_instances;
    info.set_instances(&live.instances);
    // an idle engine reports its last load until the next session
    if info.active_num_inst == 0 {
        info.load = 0;
    }
}

/// Overwrite load, model load, active instance count and the instance list of
/// one module under its device lock.
pub fn update_record(ctx: &mut DeviceContext, live: &LiveLoad) -> XcoderResult<()> {
    let mut info = ctx.lock()?;
    apply_live_load(&mut info, live);
    info.flush();
    Ok(())
}

/// Administrative overwrite of `load` and the instance list, as done by a
/// resource daemon that polls the cards itself.
pub fn update_device_load(
    ctx: &mut DeviceContext,
    load: i32,
    instances: &[SwInstance],
) -> XcoderResult<()> {
    let mut info = ctx.lock()?;
    info.load = load;
    info.set_instances(instances);
    info.flush();
    log::debug!(
        "{} {}: load {}, {} instances",
        info.dev_name(),
        info.module_id,
        load,
        instances.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Codec, DeviceType, SwInstanceStatus};
    use crate::memory::RsrcPaths;

    fn instance(id: i32) -> SwInstance {
        SwInstance::new(id, SwInstanceStatus::Active, Some(Codec::H264), 1280, 720, 30)
    }

    #[test]
    fn idle_engine_reads_zero_load() {
        let mut info = DeviceInfo::new(DeviceType::Encoder, 0);
        apply_live_load(
            &mut info,
            &LiveLoad {
                load: 37,
                model_load: 12,
                active_instances: 0,
                instances: Vec::new(),
            },
        );
        assert_eq!(info.load, 0);
        assert_eq!(info.model_load, 12);
    }

    #[test]
    fn update_record_is_visible_to_other_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RsrcPaths::new(dir.path());
        let mut ctx = DeviceContext::create(&paths, &DeviceInfo::new(DeviceType::Decoder, 1)).unwrap();

        let live = LiveLoad {
            load: 60,
            model_load: 55,
            active_instances: 2,
            instances: vec![instance(1), instance(2)],
        };
        update_record(&mut ctx, &live).unwrap();

        let snap = DeviceContext::open(&paths, DeviceType::Decoder, 1)
            .unwrap()
            .snapshot()
            .unwrap();
        assert_eq!(snap.load, 60);
        assert_eq!(snap.model_load, 55);
        assert_eq!(snap.active_num_inst, 2);
        assert_eq!(snap.instances(), &[instance(1), instance(2)]);
    }

    #[test]
    fn device_load_overwrite_keeps_other_fields() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RsrcPaths::new(dir.path());
        let mut info = DeviceInfo::new(DeviceType::Scaler, 0);
        info.model_load = 9;
        let mut ctx = DeviceContext::create(&paths, &info).unwrap();

        update_device_load(&mut ctx, 80, &[instance(4)]).unwrap();
        let snap = ctx.snapshot().unwrap();
        assert_eq!(snap.load, 80);
        assert_eq!(snap.model_load, 9);
        assert_eq!(snap.instances().len(), 1);
    }
}
