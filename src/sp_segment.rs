//! Record storage on slotted pages.
//!
//! Records are addressed by [`Tid`]. A record that outgrows its page is moved
//! to another page and its home slot becomes a redirect, so TIDs stay stable
//! for the lifetime of the record. Moved records are stored behind an 8-byte
//! prefix holding the TID of their home slot.

use std::{ops::Range, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    buffer_manager::{BufferManager, PageGuard},
    schema::Table,
    slotted_page::{max_record_size, SlottedPage, Tid, SLOT_SIZE},
    Error, FsiSegment, Result, Segment,
};

const TID_PREFIX: usize = 8;

/// The page bytes of a record, behind the latch of the page holding them.
struct RecordRef<'a> {
    page: PageGuard<'a>,
    slot: u16,
    prefix: usize,
}

impl RecordRef<'_> {
    fn range(&self) -> Range<usize> {
        let slot = SlottedPage::new(self.page.data()).slot(self.slot);
        let start = slot.offset() as usize;
        start + self.prefix..start + slot.size() as usize
    }

    fn payload(&self) -> &[u8] {
        &self.page.data()[self.range()]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        let range = self.range();
        &mut self.page.data_mut()[range]
    }
}

#[derive(Debug)]
pub struct SpSegment {
    segment: Segment,
    fsi: FsiSegment,
    table: Table,
    /// Serializes allocations so that two threads never format the same
    /// fresh page.
    allocation: Mutex<()>,
}

impl SpSegment {
    pub fn new(buffer_manager: Arc<BufferManager>, table: Table) -> Result<Self> {
        if table.sp_segment == table.fsi_segment {
            return Err(Error::config(format!(
                "table {} uses segment {} for both records and free space",
                table.name, table.sp_segment
            )));
        }
        Ok(Self {
            segment: Segment::new(table.sp_segment, Arc::clone(&buffer_manager)),
            fsi: FsiSegment::new(table.fsi_segment, buffer_manager),
            table,
            allocation: Mutex::new(()),
        })
    }

    pub fn segment_id(&self) -> u16 {
        self.segment.segment_id()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn fsi(&self) -> &FsiSegment {
        &self.fsi
    }

    /// Largest record [`SpSegment::allocate`] accepts.
    pub fn max_record_size(&self) -> u32 {
        max_record_size(self.segment.page_size())
    }

    /// Largest size a record moved to another page can take; the owner
    /// prefix and a possible second slot on page 0 come out of the page.
    fn max_moved_record_size(&self) -> u32 {
        self.max_record_size() - (TID_PREFIX + SLOT_SIZE) as u32
    }

    /// Allocates a zero-filled record of `size` bytes.
    pub fn allocate(&self, size: u32) -> Result<Tid> {
        let max = self.max_record_size();
        if size > max {
            return Err(Error::RecordTooLarge { size, max });
        }
        self.allocate_record(size, false, |_| {})
    }

    /// Copies the record into `buf`, returning the number of bytes copied.
    pub fn read(&self, tid: Tid, buf: &mut [u8]) -> Result<u32> {
        let record = self.fix_record(tid, false)?;
        let payload = record.payload();
        let len = payload.len().min(buf.len());
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(len as u32)
    }

    /// The whole record.
    pub fn read_record(&self, tid: Tid) -> Result<Vec<u8>> {
        let record = self.fix_record(tid, false)?;
        Ok(record.payload().to_vec())
    }

    pub fn record_size(&self, tid: Tid) -> Result<u32> {
        let record = self.fix_record(tid, false)?;
        Ok(record.payload().len() as u32)
    }

    /// Overwrites the record's leading bytes, returning how many were
    /// written. Never changes the record size.
    pub fn write(&self, tid: Tid, data: &[u8]) -> Result<u32> {
        let mut record = self.fix_record(tid, true)?;
        let payload = record.payload_mut();
        let len = payload.len().min(data.len());
        payload[..len].copy_from_slice(&data[..len]);
        record.page.mark_dirty();
        Ok(len as u32)
    }

    /// Changes the record size, keeping its leading bytes. New bytes read as
    /// zeros.
    pub fn resize(&self, tid: Tid, new_size: u32) -> Result<()> {
        let mut page = self.segment.fix_page(tid.page_id(), true)?;
        let mut sp = SlottedPage::new(page.data_mut());
        let slot = sp.slot(tid.slot());

        if slot.is_normal() && !slot.is_redirect_target() {
            match sp.relocate(tid.slot(), new_size) {
                Ok(()) => {
                    let free_space = sp.free_space();
                    page.mark_dirty();
                    return self.fsi.update(tid.page_id(), free_space);
                }
                Err(Error::PageFull { .. }) => {}
                Err(err) => return Err(err),
            }
            let contents = sp.record(tid.slot()).to_vec();
            drop(page);

            let target = self.move_to_overflow(tid, &contents, new_size)?;
            let mut page = self.segment.fix_page(tid.page_id(), true)?;
            let mut sp = SlottedPage::new(page.data_mut());
            sp.set_redirect(tid.slot(), target);
            let free_space = sp.free_space();
            page.mark_dirty();
            return self.fsi.update(tid.page_id(), free_space);
        }

        let Some(target) = slot.redirect_tid() else {
            return Err(invalid_slot(tid));
        };
        drop(page);
        let max = self.max_moved_record_size();
        if new_size > max {
            return Err(Error::RecordTooLarge {
                size: new_size,
                max,
            });
        }

        let mut page = self.segment.fix_page(target.page_id(), true)?;
        let mut sp = SlottedPage::new(page.data_mut());
        match sp.relocate(target.slot(), new_size + TID_PREFIX as u32) {
            Ok(()) => {
                let free_space = sp.free_space();
                page.mark_dirty();
                return self.fsi.update(target.page_id(), free_space);
            }
            Err(Error::PageFull { .. }) => {}
            Err(err) => return Err(err),
        }
        let contents = sp.record(target.slot())[TID_PREFIX..].to_vec();
        drop(page);

        let new_target = self.move_to_overflow(tid, &contents, new_size)?;
        self.erase_slot(target)?;
        let mut page = self.segment.fix_page(tid.page_id(), true)?;
        SlottedPage::new(page.data_mut()).set_redirect(tid.slot(), new_target);
        page.mark_dirty();
        Ok(())
    }

    /// Removes the record and, if it was moved, its overflow copy.
    pub fn erase(&self, tid: Tid) -> Result<()> {
        let target = {
            let page = self.segment.fix_page(tid.page_id(), false)?;
            let slot = SlottedPage::new(page.data()).slot(tid.slot());
            if slot.is_redirect() {
                slot.redirect_tid()
            } else if slot.is_normal() && !slot.is_redirect_target() {
                None
            } else {
                return Err(invalid_slot(tid));
            }
        };
        if let Some(target) = target {
            self.erase_slot(target)?;
        }
        self.erase_slot(tid)
    }

    fn erase_slot(&self, tid: Tid) -> Result<()> {
        let mut page = self.segment.fix_page(tid.page_id(), true)?;
        let mut sp = SlottedPage::new(page.data_mut());
        sp.erase(tid.slot());
        let free_space = sp.free_space();
        page.mark_dirty();
        self.fsi.update(tid.page_id(), free_space)
    }

    /// Latches the page holding the record bytes, following a redirect.
    fn fix_record(&self, tid: Tid, exclusive: bool) -> Result<RecordRef<'_>> {
        let page = self.segment.fix_page(tid.page_id(), exclusive)?;
        let slot = SlottedPage::new(page.data()).slot(tid.slot());
        if slot.is_normal() && !slot.is_redirect_target() {
            return Ok(RecordRef {
                page,
                slot: tid.slot(),
                prefix: 0,
            });
        }
        let Some(target) = slot.redirect_tid() else {
            return Err(invalid_slot(tid));
        };
        drop(page);

        let page = self.segment.fix_page(target.page_id(), exclusive)?;
        let target_slot = SlottedPage::new(page.data()).slot(target.slot());
        assert!(
            target_slot.is_redirect_target(),
            "{tid:?} redirects to {target:?}, which holds no moved record"
        );
        Ok(RecordRef {
            page,
            slot: target.slot(),
            prefix: TID_PREFIX,
        })
    }

    /// Stores `contents` (zero-extended to `new_size`) as a moved record of
    /// `owner` on some other page.
    fn move_to_overflow(&self, owner: Tid, contents: &[u8], new_size: u32) -> Result<Tid> {
        let max = self.max_moved_record_size();
        if new_size > max {
            return Err(Error::RecordTooLarge {
                size: new_size,
                max,
            });
        }
        let len = contents.len().min(new_size as usize);
        let target = self.allocate_record(new_size + TID_PREFIX as u32, true, |bytes| {
            bytes[..TID_PREFIX].copy_from_slice(&owner.raw().to_le_bytes());
            bytes[TID_PREFIX..TID_PREFIX + len].copy_from_slice(&contents[..len]);
        })?;
        debug!(?owner, ?target, new_size, "moved record to overflow slot");
        Ok(target)
    }

    fn allocate_record(
        &self,
        size: u32,
        redirect_target: bool,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<Tid> {
        let _allocation = self.allocation.lock();
        //  TID 0 reads as an empty slot, so it never becomes a redirect target
        let reserved_slots = if redirect_target { 2 } else { 1 };
        let required = size + reserved_slots * SLOT_SIZE as u32;
        loop {
            let page_id = self.fsi.find(required)?.ok_or(Error::SegmentFull {
                segment_id: self.segment_id(),
                pages: crate::segment::MAX_LOCAL_PAGE_ID + 1,
            })?;
            let allocated = self.fsi.allocated_pages()?;

            let mut page = self.segment.fix_page(page_id, true)?;
            let mut sp = if page_id >= allocated {
                SlottedPage::init(page.data_mut())
            } else {
                SlottedPage::new(page.data_mut())
            };
            let min_slot = if redirect_target && page_id == 0 { 1 } else { 0 };
            match sp.allocate_from(size, min_slot) {
                Ok(slot) => {
                    if redirect_target {
                        sp.mark_redirect_target(slot);
                    }
                    let record = sp.record_mut(slot);
                    record.fill(0);
                    fill(record);
                    let free_space = sp.free_space();
                    page.mark_dirty();
                    self.fsi.update(page_id, free_space)?;
                    return Ok(Tid::new(page_id, slot));
                }
                Err(Error::PageFull { .. }) => {
                    let free_space = sp.free_space();
                    if page_id >= allocated {
                        page.mark_dirty();
                    }
                    self.fsi.update(page_id, free_space)?;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn invalid_slot(tid: Tid) -> Error {
    Error::InvalidSlot {
        page: tid.page_id(),
        slot: tid.slot(),
    }
}
