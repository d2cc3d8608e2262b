//! Slotted page layout for variable-length records.
//!
//! ```text
//! +--------+------------------+ ... free ... +---------------------------+
//! | header | slot 0 | slot 1  |              | record 1 | record 0 | ... |
//! +--------+------------------+ ... free ... +---------------------------+
//! 0        12                                data_start                  page_size
//! ```
//!
//! The header is `slot_count: u16`, `first_free_slot: u16`,
//! `data_start: u32`, `free_space: u32`, all little-endian. Records grow
//! downward from the page end; slots grow upward after the header.

use std::fmt;

use crate::{Error, Result};

pub const HEADER_SIZE: usize = 12;
pub const SLOT_SIZE: usize = 8;

const SIZE_MASK: u64 = 0xFF_FFFF;
const OFFSET_SHIFT: u32 = 24;
const TARGET_SHIFT: u32 = 48;
const TAG_SHIFT: u32 = 56;
const NORMAL_TAG: u64 = 0xFF;

/// Record identifier: segment-local page number and slot index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(u64);

impl Tid {
    pub fn new(page_id: u64, slot: u16) -> Self {
        debug_assert!(page_id < (1 << 48));
        Self((page_id << 16) | slot as u64)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn page_id(&self) -> u64 {
        self.0 >> 16
    }

    pub fn slot(&self) -> u16 {
        self.0 as u16
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({}:{})", self.page_id(), self.slot())
    }
}

/// A slot directory entry.
///
/// Either empty (all zeros), a normal slot, or a redirect. A normal slot
/// carries `0xFF` in its top byte, the redirect-target flag in bits
/// `[48, 56)`, the record offset in `[24, 48)` and its size in `[0, 24)`.
/// Any other non-zero value is the TID the record was moved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Slot(u64);

impl Slot {
    pub const EMPTY: Slot = Slot(0);

    pub fn new(offset: u32, size: u32, is_redirect_target: bool) -> Self {
        let mut slot = Slot(NORMAL_TAG << TAG_SHIFT);
        slot.set_offset(offset);
        slot.set_size(size);
        slot.set_redirect_target(is_redirect_target);
        slot
    }

    pub fn redirect(tid: Tid) -> Self {
        let slot = Slot(tid.raw());
        assert!(
            slot.is_redirect(),
            "{tid:?} cannot be encoded as a redirect slot"
        );
        slot
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_redirect(&self) -> bool {
        !self.is_empty() && (self.0 >> TAG_SHIFT) != NORMAL_TAG
    }

    /// Holds a record on this page (possibly one moved here from elsewhere).
    pub fn is_normal(&self) -> bool {
        (self.0 >> TAG_SHIFT) == NORMAL_TAG
    }

    pub fn redirect_tid(&self) -> Option<Tid> {
        self.is_redirect().then(|| Tid::from_raw(self.0))
    }

    pub fn offset(&self) -> u32 {
        ((self.0 >> OFFSET_SHIFT) & SIZE_MASK) as u32
    }

    pub fn size(&self) -> u32 {
        (self.0 & SIZE_MASK) as u32
    }

    pub fn is_redirect_target(&self) -> bool {
        self.is_normal() && (self.0 >> TARGET_SHIFT) & 0xFF != 0
    }

    pub fn set_offset(&mut self, offset: u32) {
        debug_assert!(offset as u64 <= SIZE_MASK);
        self.0 = (self.0 & !(SIZE_MASK << OFFSET_SHIFT))
            | ((offset as u64 & SIZE_MASK) << OFFSET_SHIFT);
    }

    pub fn set_size(&mut self, size: u32) {
        debug_assert!(size as u64 <= SIZE_MASK);
        self.0 = (self.0 & !SIZE_MASK) | (size as u64 & SIZE_MASK);
    }

    pub fn set_redirect_target(&mut self, is_redirect_target: bool) {
        let flag = if is_redirect_target { 1 } else { 0 };
        self.0 = (self.0 & !(0xFF << TARGET_SHIFT)) | (flag << TARGET_SHIFT);
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.set_offset(offset);
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.set_size(size);
        self
    }

    fn range(&self) -> std::ops::Range<usize> {
        let offset = self.offset() as usize;
        offset..offset + self.size() as usize
    }
}

/// Largest record an empty page can hold.
pub fn max_record_size(page_size: usize) -> u32 {
    (page_size - HEADER_SIZE - SLOT_SIZE) as u32
}

/// A slotted page view over a page's bytes.
///
/// Read-only operations work on any byte buffer, mutating ones need a
/// mutable one (`&mut [u8]`, typically from an exclusively fixed page).
pub struct SlottedPage<B> {
    data: B,
}

impl<B: AsRef<[u8]>> SlottedPage<B> {
    pub fn new(data: B) -> Self {
        assert!(
            data.as_ref().len() >= HEADER_SIZE + SLOT_SIZE,
            "page too small for a slotted page"
        );
        Self { data }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes([self.bytes()[at], self.bytes()[at + 1]])
    }

    fn read_u32(&self, at: usize) -> u32 {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&self.bytes()[at..at + 4]);
        u32::from_le_bytes(buf)
    }

    pub fn page_size(&self) -> usize {
        self.bytes().len()
    }

    pub fn slot_count(&self) -> u16 {
        self.read_u16(0)
    }

    pub fn first_free_slot(&self) -> u16 {
        self.read_u16(2)
    }

    pub fn data_start(&self) -> u32 {
        self.read_u32(4)
    }

    /// Bytes available to new records and slots after compaction.
    pub fn free_space(&self) -> u32 {
        self.read_u32(8)
    }

    /// Contiguous gap between the slot directory and `data_start`.
    pub fn fragmented_free_space(&self) -> u32 {
        self.data_start() - self.directory_end(self.slot_count()) as u32
    }

    fn directory_end(&self, slot_count: u16) -> usize {
        HEADER_SIZE + slot_count as usize * SLOT_SIZE
    }

    pub fn slot(&self, slot_id: u16) -> Slot {
        if slot_id >= self.slot_count() {
            return Slot::EMPTY;
        }
        let at = HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes()[at..at + SLOT_SIZE]);
        Slot::from_raw(u64::from_le_bytes(buf))
    }

    /// Bytes of the record stored in a normal slot.
    pub fn record(&self, slot_id: u16) -> &[u8] {
        let slot = self.slot(slot_id);
        assert!(slot.is_normal(), "slot {slot_id} holds no record on this page");
        &self.bytes()[slot.range()]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> SlottedPage<B> {
    /// Formats `data` as an empty slotted page.
    pub fn init(mut data: B) -> Self {
        let page_size = data.as_ref().len();
        assert!(page_size >= HEADER_SIZE + SLOT_SIZE);
        data.as_mut()[..HEADER_SIZE].fill(0);
        let mut page = Self { data };
        page.set_slot_count(0);
        page.set_first_free_slot(0);
        page.set_data_start(page_size as u32);
        page.set_free_space((page_size - HEADER_SIZE) as u32);
        page
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    fn write_u16(&mut self, at: usize, value: u16) {
        self.bytes_mut()[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn write_u32(&mut self, at: usize, value: u32) {
        self.bytes_mut()[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn set_slot_count(&mut self, value: u16) {
        self.write_u16(0, value);
    }

    fn set_first_free_slot(&mut self, value: u16) {
        self.write_u16(2, value);
    }

    fn set_data_start(&mut self, value: u32) {
        self.write_u32(4, value);
    }

    fn set_free_space(&mut self, value: u32) {
        self.write_u32(8, value);
    }

    pub fn set_slot(&mut self, slot_id: u16, slot: Slot) {
        assert!(slot_id < self.slot_count(), "slot {slot_id} out of range");
        let at = HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        self.bytes_mut()[at..at + SLOT_SIZE].copy_from_slice(&slot.raw().to_le_bytes());
    }

    pub fn record_mut(&mut self, slot_id: u16) -> &mut [u8] {
        let slot = self.slot(slot_id);
        assert!(slot.is_normal(), "slot {slot_id} holds no record on this page");
        &mut self.bytes_mut()[slot.range()]
    }

    /// Allocates a record of `size` bytes and returns its slot.
    pub fn allocate(&mut self, size: u32) -> Result<u16> {
        self.allocate_from(size, 0)
    }

    /// Like [`SlottedPage::allocate`] but only uses slots `>= min_slot`.
    pub fn allocate_from(&mut self, size: u32, min_slot: u16) -> Result<u16> {
        let slot_count = self.slot_count();
        let start = self.first_free_slot().max(min_slot);
        let slot_id = (start..slot_count)
            .find(|&idx| self.slot(idx).is_empty())
            .unwrap_or_else(|| slot_count.max(min_slot));
        let new_slot_count = slot_count.max(slot_id + 1);
        let directory_growth = (new_slot_count - slot_count) as u32 * SLOT_SIZE as u32;

        let free_space = self.free_space();
        let fits = size
            .checked_add(directory_growth)
            .is_some_and(|needed| needed <= free_space);
        if !fits {
            return Err(Error::PageFull {
                requested: size,
                available: free_space.saturating_sub(directory_growth),
            });
        }

        let directory_end = self.directory_end(new_slot_count) as u32;
        if self.data_start() < directory_end + size {
            self.compactify();
        }
        //  new directory entries start out empty
        let old_end = self.directory_end(slot_count);
        let new_end = directory_end as usize;
        self.bytes_mut()[old_end..new_end].fill(0);
        self.set_slot_count(new_slot_count);

        let offset = self.data_start() - size;
        self.set_data_start(offset);
        self.set_free_space(free_space - size - directory_growth);
        self.set_slot(slot_id, Slot::new(offset, size, false));

        if slot_id == self.first_free_slot() {
            let next_free = (slot_id + 1..new_slot_count)
                .find(|&idx| self.slot(idx).is_empty())
                .unwrap_or(new_slot_count);
            self.set_first_free_slot(next_free);
        }
        Ok(slot_id)
    }

    /// Changes the size of a normal slot's record, keeping its bytes.
    ///
    /// Shrinks in place. Grows in place if the record sits at `data_start`
    /// with enough room below it, otherwise moves it, compacting first if
    /// necessary. Bytes past the old size are zeroed.
    pub fn relocate(&mut self, slot_id: u16, new_size: u32) -> Result<()> {
        let slot = self.slot(slot_id);
        assert!(slot.is_normal(), "slot {slot_id} holds no record on this page");
        let old_size = slot.size();
        let free_space = self.free_space();

        if new_size <= old_size {
            self.set_slot(slot_id, slot.with_size(new_size));
            self.set_free_space(free_space + (old_size - new_size));
            return Ok(());
        }

        let extra = new_size - old_size;
        if extra > free_space {
            return Err(Error::PageFull {
                requested: new_size,
                available: free_space.saturating_add(old_size),
            });
        }

        if slot.offset() == self.data_start() && self.fragmented_free_space() >= extra {
            let old = slot.range();
            let new_offset = slot.offset() - extra;
            self.bytes_mut().copy_within(old, new_offset as usize);
            let tail = (new_offset + old_size) as usize..(new_offset + new_size) as usize;
            self.bytes_mut()[tail].fill(0);
            self.set_data_start(new_offset);
            self.set_free_space(free_space - extra);
            self.set_slot(slot_id, slot.with_offset(new_offset).with_size(new_size));
            return Ok(());
        }

        let contents = self.bytes()[slot.range()].to_vec();
        //  detach the record so that compaction skips it
        self.set_slot(slot_id, Slot::EMPTY);
        if slot.offset() == self.data_start() {
            self.set_data_start(slot.offset() + old_size);
        }
        self.set_free_space(free_space + old_size);
        if self.fragmented_free_space() < new_size {
            self.compactify();
        }
        let offset = self.data_start() - new_size;
        let start = offset as usize;
        self.bytes_mut()[start..start + old_size as usize].copy_from_slice(&contents);
        self.bytes_mut()[start + old_size as usize..start + new_size as usize].fill(0);
        self.set_data_start(offset);
        self.set_free_space(free_space - extra);
        self.set_slot(
            slot_id,
            Slot::new(offset, new_size, slot.is_redirect_target()),
        );
        Ok(())
    }

    /// Clears a slot and recovers its space.
    pub fn erase(&mut self, slot_id: u16) {
        let slot = self.slot(slot_id);
        assert!(!slot.is_empty(), "erasing empty slot {slot_id}");
        let mut free_space = self.free_space();
        if slot.is_normal() {
            if slot.offset() == self.data_start() {
                self.set_data_start(slot.offset() + slot.size());
            }
            free_space += slot.size();
        }
        self.set_slot(slot_id, Slot::EMPTY);

        let mut slot_count = self.slot_count();
        while slot_count > 0 && self.slot(slot_count - 1).is_empty() {
            slot_count -= 1;
            free_space += SLOT_SIZE as u32;
        }
        self.set_slot_count(slot_count);
        self.set_free_space(free_space);
        let first_free = self.first_free_slot().min(slot_id).min(slot_count);
        self.set_first_free_slot(first_free);
    }

    /// Turns a slot into a redirect to `tid`. The record bytes held by the
    /// slot, if any, are released.
    pub fn set_redirect(&mut self, slot_id: u16, tid: Tid) {
        let slot = self.slot(slot_id);
        assert!(!slot.is_empty(), "redirecting empty slot {slot_id}");
        if slot.is_normal() {
            if slot.offset() == self.data_start() {
                self.set_data_start(slot.offset() + slot.size());
            }
            let free_space = self.free_space();
            self.set_free_space(free_space + slot.size());
        }
        self.set_slot(slot_id, Slot::redirect(tid));
    }

    /// Flags a normal slot as holding a record moved here from elsewhere.
    pub fn mark_redirect_target(&mut self, slot_id: u16) {
        let mut slot = self.slot(slot_id);
        assert!(slot.is_normal(), "slot {slot_id} holds no record on this page");
        slot.set_redirect_target(true);
        self.set_slot(slot_id, slot);
    }

    /// Packs all records against the page end, highest offset first.
    pub fn compactify(&mut self) {
        let mut records: Vec<(u16, Slot)> = (0..self.slot_count())
            .map(|idx| (idx, self.slot(idx)))
            .filter(|(_, slot)| slot.is_normal())
            .collect();
        records.sort_by(|a, b| b.1.offset().cmp(&a.1.offset()));

        let mut end = self.page_size() as u32;
        for (slot_id, slot) in records {
            let new_offset = end - slot.size();
            if new_offset != slot.offset() {
                self.bytes_mut()
                    .copy_within(slot.range(), new_offset as usize);
                self.set_slot(slot_id, slot.with_offset(new_offset));
            }
            end = new_offset;
        }
        self.set_data_start(end);
        debug_assert_eq!(self.fragmented_free_space(), self.free_space());
    }
}

#[cfg(test)]
mod slot_tests {
    use super::*;

    #[test]
    fn offset_size_flag_round_trip() {
        let slot = Slot::new(0x12_3456, 0xAB_CDEF, true);
        assert_eq!(slot.offset(), 0x12_3456);
        assert_eq!(slot.size(), 0xAB_CDEF);
        assert!(slot.is_redirect_target());
        assert!(slot.is_normal());
        assert!(!slot.is_redirect());
        assert!(!slot.is_empty());
        assert_eq!(slot.raw() >> 56, 0xFF);
    }

    #[test]
    fn updating_offset_preserves_size_and_flag() {
        let slot = Slot::new(100, 20, true).with_offset(400);
        assert_eq!(slot.offset(), 400);
        assert_eq!(slot.size(), 20);
        assert!(slot.is_redirect_target());

        let slot = slot.with_size(33);
        assert_eq!(slot.offset(), 400);
        assert_eq!(slot.size(), 33);
    }

    #[test]
    fn clearing_redirect_target_flag() {
        let mut slot = Slot::new(1, 2, true);
        slot.set_redirect_target(false);
        assert!(!slot.is_redirect_target());
        assert_eq!(slot.raw() >> 48, 0xFF00);
    }

    #[test]
    fn redirect_slots_carry_tids() {
        let tid = Tid::new(77, 3);
        let slot = Slot::redirect(tid);
        assert!(slot.is_redirect());
        assert!(!slot.is_normal());
        assert_eq!(slot.redirect_tid(), Some(tid));
        assert_eq!(Slot::new(1, 1, false).redirect_tid(), None);
    }

    #[test]
    fn empty_slot_is_all_zeros() {
        assert!(Slot::EMPTY.is_empty());
        assert!(!Slot::EMPTY.is_redirect());
        assert!(!Slot::EMPTY.is_normal());
    }

    #[test]
    fn tid_layout() {
        let tid = Tid::new(0x1234_5678_9ABC, 0xDEF0);
        assert_eq!(tid.raw(), 0x1234_5678_9ABC_DEF0);
        assert_eq!(tid.page_id(), 0x1234_5678_9ABC);
        assert_eq!(tid.slot(), 0xDEF0);
    }
}
