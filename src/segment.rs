//! Segments partition the global page id space.
//!
//! A global page id carries the segment id in its high 16 bits and the
//! segment-local page number in the low 48 bits.

use std::sync::Arc;

use crate::{
    buffer_manager::{BufferManager, PageGuard},
    Result,
};

pub const LOCAL_PAGE_BITS: u32 = 48;

/// Largest local page number a segment can address.
pub const MAX_LOCAL_PAGE_ID: u64 = (1 << LOCAL_PAGE_BITS) - 1;

pub fn global_page_id(segment_id: u16, local_page_id: u64) -> u64 {
    debug_assert!(local_page_id <= MAX_LOCAL_PAGE_ID);
    ((segment_id as u64) << LOCAL_PAGE_BITS) | (local_page_id & MAX_LOCAL_PAGE_ID)
}

pub fn segment_id(page_id: u64) -> u16 {
    (page_id >> LOCAL_PAGE_BITS) as u16
}

pub fn local_page_id(page_id: u64) -> u64 {
    page_id & MAX_LOCAL_PAGE_ID
}

/// A view of the buffer manager restricted to one segment.
#[derive(Debug, Clone)]
pub struct Segment {
    segment_id: u16,
    buffer_manager: Arc<BufferManager>,
}

impl Segment {
    pub fn new(segment_id: u16, buffer_manager: Arc<BufferManager>) -> Self {
        Self {
            segment_id,
            buffer_manager,
        }
    }

    pub fn segment_id(&self) -> u16 {
        self.segment_id
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffer_manager
    }

    pub fn page_size(&self) -> usize {
        self.buffer_manager.page_size()
    }

    pub fn page_id(&self, local_page_id: u64) -> u64 {
        global_page_id(self.segment_id, local_page_id)
    }

    /// Fixes a page of this segment by its local page number.
    pub fn fix_page(&self, local_page_id: u64, exclusive: bool) -> Result<PageGuard<'_>> {
        self.buffer_manager
            .fix_page(self.page_id(local_page_id), exclusive)
    }
}
