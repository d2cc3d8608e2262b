//! Fixed-capacity page cache.
//!
//! # Shared Types
//!
//! - `FrameMeta`: Per-frame bookkeeping (page id, pins, dirty flag, queue links),
//!   guarded by the buffer manager's directory mutex
//! - `BufferFrame`: A frame's latch and page bytes
//! - `BufferStats`: Hit/miss statistics for the buffer pool
//!
//! The manager itself lives in `manager`.

mod manager;

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{intrusive_dll::IntrusiveNode, replacement::Queue};

pub use manager::{BufferManager, PageGuard};

// ============================================================================
// FrameMeta
// ============================================================================

#[derive(Debug)]
pub(crate) struct FrameMeta {
    pub(crate) page_id: Option<u64>,
    pub(crate) pins: usize,
    pub(crate) dirty: bool,
    pub(crate) queue: Queue,
    prev_idx: Option<usize>,
    next_idx: Option<usize>,
}

impl FrameMeta {
    pub(crate) fn new() -> Self {
        Self {
            page_id: None,
            pins: 0,
            dirty: false,
            queue: Queue::None,
            prev_idx: None,
            next_idx: None,
        }
    }

    pub(crate) fn pin(&mut self) -> bool {
        let was_zero = self.pins == 0;
        self.pins += 1;
        was_zero
    }

    pub(crate) fn unpin(&mut self) -> bool {
        assert!(self.pins > 0, "FrameMeta::unpin on zero pins");
        self.pins -= 1;
        self.pins == 0
    }
}

impl IntrusiveNode for FrameMeta {
    fn prev(&self) -> Option<usize> {
        self.prev_idx
    }

    fn set_prev(&mut self, prev: Option<usize>) {
        self.prev_idx = prev
    }

    fn next(&self) -> Option<usize> {
        self.next_idx
    }

    fn set_next(&mut self, next: Option<usize>) {
        self.next_idx = next
    }
}

// ============================================================================
// BufferFrame
// ============================================================================

/// The latched part of a frame.
///
/// `page_id` is the page whose bytes are actually loaded. It only changes
/// under the exclusive latch and lags behind `FrameMeta::page_id` while a
/// load is in flight.
#[derive(Debug)]
pub(crate) struct FrameData {
    pub(crate) page_id: Option<u64>,
    pub(crate) bytes: Box<[u8]>,
}

#[derive(Debug)]
pub(crate) struct BufferFrame {
    data: RwLock<FrameData>,
}

impl BufferFrame {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            data: RwLock::new(FrameData {
                page_id: None,
                bytes: vec![0; page_size].into_boxed_slice(),
            }),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, FrameData> {
        self.data.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, FrameData> {
        self.data.write()
    }

    pub(crate) fn try_write(&self) -> Option<RwLockWriteGuard<'_, FrameData>> {
        self.data.try_write()
    }
}

// ============================================================================
// BufferStats
// ============================================================================

#[derive(Debug)]
pub struct BufferStats {
    pub hits: AtomicUsize,
    pub misses: AtomicUsize,
}

impl Default for BufferStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferStats {
    pub fn new() -> Self {
        Self {
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    pub fn hit_rate(&self) -> f64 {
        let (hits, misses) = self.get();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}
