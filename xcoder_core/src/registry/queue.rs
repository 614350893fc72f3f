//! The device queue: per-type ordered GUID lists, stored in the pool segment.
//!
//! # Layout (2096 bytes, repr(C), align 8)
//!
//! ```text
//! magic:     u64
//! version:   u32
//! _reserved: u32
//! counts:    [u32; 4]
//! next_guid: [i32; 4]
//! slots:     [[i32; 128]; 4]
//! ```
//!
//! For each type, `slots[t][..counts[t]]` holds distinct registered GUIDs in
//! allocation-recency order (least recently chosen first); every other slot
//! holds [`EMPTY_SLOT`].

use crate::device::{DeviceType, MAX_DEVICE_CNT, XCODER_TYPE_COUNT};
use crate::error::{XcoderError, XcoderResult};
use bytemuck::{Pod, Zeroable};

/// Magic number for pool validation ("XCDR_QUE")
pub const QUEUE_MAGIC: u64 = 0x5843_4452_5F51_5545;
/// Current pool layout version
pub const QUEUE_VERSION: u32 = 1;
/// Sentinel for an unused slot.
pub const EMPTY_SLOT: i32 = -1;

#[repr(C)]
#[derive(Clone, Copy)]
pub struct DeviceQueue {
    magic: u64,
    version: u32,
    _reserved: u32,
    counts: [u32; XCODER_TYPE_COUNT],
    next_guid: [i32; XCODER_TYPE_COUNT],
    slots: [[i32; MAX_DEVICE_CNT]; XCODER_TYPE_COUNT],
}

// Safety: repr(C), 8 + 4 + 4 + 16 + 16 + 2048 = 2096 bytes, all fields
// naturally aligned, no implicit padding.
unsafe impl Zeroable for DeviceQueue {}
unsafe impl Pod for DeviceQueue {}

impl DeviceQueue {
    /// Reset to an empty, valid registry.
    pub fn init(&mut self) {
        self.magic = QUEUE_MAGIC;
        self.version = QUEUE_VERSION;
        self._reserved = 0;
        self.counts = [0; XCODER_TYPE_COUNT];
        self.next_guid = [0; XCODER_TYPE_COUNT];
        self.slots = [[EMPTY_SLOT; MAX_DEVICE_CNT]; XCODER_TYPE_COUNT];
    }

    /// Structural check: header, count bounds and the slot invariant.
    pub fn validate(&self) -> XcoderResult<()> {
        if self.magic != QUEUE_MAGIC {
            return Err(XcoderError::corrupted(format!(
                "device pool magic {:#x}",
                self.magic
            )));
        }
        if self.version != QUEUE_VERSION {
            return Err(XcoderError::corrupted(format!(
                "device pool version {} (expected {})",
                self.version, QUEUE_VERSION
            )));
        }

        for device_type in DeviceType::XCODERS {
            let t = device_type.index();
            let count = self.counts[t] as usize;
            if count > MAX_DEVICE_CNT {
                return Err(XcoderError::corrupted(format!(
                    "{} count {} exceeds {}",
                    device_type, count, MAX_DEVICE_CNT
                )));
            }

            let mut seen = [false; MAX_DEVICE_CNT];
            for (pos, &guid) in self.slots[t].iter().enumerate() {
                if pos >= count {
                    if guid != EMPTY_SLOT {
                        return Err(XcoderError::corrupted(format!(
                            "{} slot {} beyond count {} holds {}",
                            device_type, pos, count, guid
                        )));
                    }
                    continue;
                }
                let Some(flag) = usize::try_from(guid).ok().and_then(|g| seen.get_mut(g)) else {
                    return Err(XcoderError::corrupted(format!(
                        "{} slot {} holds invalid guid {}",
                        device_type, pos, guid
                    )));
                };
                if *flag {
                    return Err(XcoderError::corrupted(format!(
                        "{} guid {} queued twice",
                        device_type, guid
                    )));
                }
                *flag = true;
            }

            if !(0..=MAX_DEVICE_CNT as i32).contains(&self.next_guid[t]) {
                return Err(XcoderError::corrupted(format!(
                    "{} next guid {}",
                    device_type, self.next_guid[t]
                )));
            }
        }
        Ok(())
    }

    pub fn count(&self, device_type: DeviceType) -> usize {
        (self.counts[device_type.index()] as usize).min(MAX_DEVICE_CNT)
    }

    /// Registered GUIDs of a type, front = least recently allocated.
    pub fn guids(&self, device_type: DeviceType) -> &[i32] {
        &self.slots[device_type.index()][..self.count(device_type)]
    }

    /// Whole slot array, including empty slots.
    pub fn slots(&self, device_type: DeviceType) -> &[i32; MAX_DEVICE_CNT] {
        &self.slots[device_type.index()]
    }

    pub fn contains(&self, device_type: DeviceType, guid: i32) -> bool {
        self.guids(device_type).contains(&guid)
    }

    pub fn is_full(&self, device_type: DeviceType) -> bool {
        self.count(device_type) >= MAX_DEVICE_CNT
    }

    /// Pick the GUID for a new module. GUIDs are handed out from a per-type
    /// counter so a removed module's GUID is not reused while fresh values
    /// remain; once the counter is exhausted the lowest free GUID is used.
    /// The counter only moves when the GUID is [`push`](Self::push)ed, so a
    /// registration that fails in between burns nothing.
    pub fn allocate_guid(&self, device_type: DeviceType) -> Option<i32> {
        let candidate = self.next_guid[device_type.index()];
        if (0..MAX_DEVICE_CNT as i32).contains(&candidate) && !self.contains(device_type, candidate) {
            Some(candidate)
        } else {
            self.find_available_guid(device_type)
        }
    }

    /// Lowest GUID not present in the type's queue.
    pub fn find_available_guid(&self, device_type: DeviceType) -> Option<i32> {
        let mut used = [false; MAX_DEVICE_CNT];
        for &guid in self.guids(device_type) {
            if let Some(flag) = usize::try_from(guid).ok().and_then(|g| used.get_mut(g)) {
                *flag = true;
            }
        }
        used.iter().position(|u| !u).map(|g| g as i32)
    }

    /// Append `guid` at the back (most recently allocated end).
    pub fn push(&mut self, device_type: DeviceType, guid: i32) -> XcoderResult<()> {
        if self.is_full(device_type) {
            return Err(XcoderError::unavailable(format!(
                "{} registry full ({} modules)",
                device_type, MAX_DEVICE_CNT
            )));
        }
        if !(0..MAX_DEVICE_CNT as i32).contains(&guid) {
            return Err(XcoderError::invalid_input(format!("guid {} out of range", guid)));
        }
        if self.contains(device_type, guid) {
            return Err(XcoderError::AlreadyExists(format!("{} {}", device_type, guid)));
        }
        let t = device_type.index();
        let count = self.count(device_type);
        self.slots[t][count] = guid;
        self.counts[t] += 1;
        self.next_guid[t] = self.next_guid[t].max(guid + 1);
        Ok(())
    }

    /// Clear every slot holding one of `guids`, then close the gaps keeping
    /// the order of the survivors. Returns how many entries were removed.
    pub fn remove_guids(&mut self, device_type: DeviceType, guids: &[i32]) -> usize {
        let t = device_type.index();
        let count = self.count(device_type);

        let mut removed = 0;
        for slot in &mut self.slots[t][..count] {
            if guids.contains(slot) {
                *slot = EMPTY_SLOT;
                removed += 1;
            }
        }
        self.counts[t] -= removed as u32;
        self.compact(device_type);
        removed
    }

    /// Shift occupied slots to the front, preserving order.
    fn compact(&mut self, device_type: DeviceType) {
        let row = &mut self.slots[device_type.index()];
        let mut write = 0;
        for read in 0..MAX_DEVICE_CNT {
            if row[read] != EMPTY_SLOT {
                row[write] = row[read];
                write += 1;
            }
        }
        row[write..].fill(EMPTY_SLOT);
    }

    /// Move `guid` to the last occupied position. Returns false if it is not
    /// registered.
    pub fn move_to_end(&mut self, device_type: DeviceType, guid: i32) -> bool {
        let count = self.count(device_type);
        let row = &mut self.slots[device_type.index()][..count];
        match row.iter().position(|&g| g == guid) {
            Some(pos) => {
                row[pos..].rotate_left(1);
                true
            }
            None => false,
        }
    }

    /// Overwrite the per-type counts, for tests of corruption handling.
    #[cfg(test)]
    pub(crate) fn force_count(&mut self, device_type: DeviceType, count: u32) {
        self.counts[device_type.index()] = count;
    }
}
