use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use parking_lot::{Condvar, Mutex, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};

use super::{BufferFrame, BufferStats, FrameData, FrameMeta};
use crate::{replacement::PolicyState, Error, PageIo, Result, StorageConfig};

/// Maps, queues and frame bookkeeping. Only ever held for short, non-blocking
/// sections; never across disk I/O or a blocking latch acquisition.
struct Directory {
    table: HashMap<u64, usize>,
    metas: Vec<FrameMeta>,
    policy: PolicyState,
    free: Vec<usize>,
    /// Evicted pages whose write-back has not finished yet.
    in_flight: HashSet<u64>,
}

/// A fixed-size cache of pages with shared/exclusive page latches.
///
/// Pages are fixed with [`BufferManager::fix_page`] and released with
/// [`BufferManager::unfix_page`] (or by dropping the guard). While fixed, a
/// page is pinned to its frame and cannot be evicted.
pub struct BufferManager {
    page_size: usize,
    page_count: usize,
    page_io: Arc<PageIo>,
    frames: Vec<BufferFrame>,
    directory: Mutex<Directory>,
    write_back_done: Condvar,
    stats: BufferStats,
}

impl fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager")
            .field("page_size", &self.page_size)
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}

impl BufferManager {
    /// Creates a buffer manager with `page_count` frames of `page_size` bytes.
    pub fn new(page_size: usize, page_count: usize, page_io: Arc<PageIo>) -> Result<Self> {
        StorageConfig::new(page_size, page_count).validate()?;
        if page_io.page_size() != page_size {
            return Err(Error::config(format!(
                "page size {page_size} does not match the page I/O page size {}",
                page_io.page_size()
            )));
        }
        let mut metas = Vec::with_capacity(page_count);
        metas.resize_with(page_count, FrameMeta::new);
        Ok(Self {
            page_size,
            page_count,
            page_io,
            frames: (0..page_count).map(|_| BufferFrame::new(page_size)).collect(),
            directory: Mutex::new(Directory {
                table: HashMap::with_capacity(page_count),
                metas,
                policy: PolicyState::new(),
                free: (0..page_count).rev().collect(),
                in_flight: HashSet::new(),
            }),
            write_back_done: Condvar::new(),
            stats: BufferStats::new(),
        })
    }

    /// Creates the page I/O layer and a buffer manager from one configuration.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let page_io = Arc::new(PageIo::new(config)?);
        Self::new(config.page_size, config.page_count, page_io)
    }

    /// A buffer manager whose segments live in temporary files.
    pub fn temporary(page_size: usize, page_count: usize) -> Result<Self> {
        Self::open(&StorageConfig::new(page_size, page_count))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn page_io(&self) -> &Arc<PageIo> {
        &self.page_io
    }

    pub fn stats(&self) -> &BufferStats {
        &self.stats
    }

    /// Fixes the page, loading it from disk if it is not resident.
    ///
    /// Never-written pages read as zeros. Fails with [`Error::BufferFull`]
    /// when every frame is pinned; the call is never retried internally.
    pub fn fix_page(&self, page_id: u64, exclusive: bool) -> Result<PageGuard<'_>> {
        loop {
            let mut dir = self.directory.lock();
            while dir.in_flight.contains(&page_id) {
                self.write_back_done.wait(&mut dir);
            }

            let resident = dir.table.get(&page_id).copied();
            let Some(frame_idx) = resident else {
                self.stats.record_miss();
                return self.load_page(dir, page_id, exclusive);
            };

            let Directory { metas, policy, .. } = &mut *dir;
            metas[frame_idx].pin();
            policy.record_hit(metas, frame_idx);
            drop(dir);
            self.stats.record_hit();

            let latch = Latch::acquire(&self.frames[frame_idx], exclusive);
            if latch.frame().page_id == Some(page_id) {
                return Ok(PageGuard {
                    manager: self,
                    frame_idx,
                    page_id,
                    latch: Some(latch),
                    dirty: false,
                });
            }
            //  the load we waited for failed, start over
            drop(latch);
            self.release(frame_idx, false);
        }
    }

    /// Releases a fixed page. `is_dirty` is sticky until the page is written.
    pub fn unfix_page(&self, mut page: PageGuard<'_>, is_dirty: bool) {
        assert!(
            std::ptr::eq(page.manager, self),
            "page was fixed by another buffer manager"
        );
        page.dirty |= is_dirty;
    }

    /// Page ids in the FIFO queue, head first.
    ///
    /// Diagnostic snapshot; only meaningful without concurrent fixers.
    pub fn fifo_list(&self) -> Vec<u64> {
        let dir = self.directory.lock();
        dir.policy
            .fifo_frames(&dir.metas)
            .into_iter()
            .filter_map(|idx| dir.metas[idx].page_id)
            .collect()
    }

    /// Page ids in the LRU queue, least recently used first.
    ///
    /// Diagnostic snapshot; only meaningful without concurrent fixers.
    pub fn lru_list(&self) -> Vec<u64> {
        let dir = self.directory.lock();
        dir.policy
            .lru_frames(&dir.metas)
            .into_iter()
            .filter_map(|idx| dir.metas[idx].page_id)
            .collect()
    }

    /// Pin count of a resident page, `None` if the page is not resident.
    pub fn pin_count(&self, page_id: u64) -> Option<usize> {
        let dir = self.directory.lock();
        dir.table.get(&page_id).map(|&idx| dir.metas[idx].pins)
    }

    /// Writes every dirty, unpinned page back to disk.
    pub fn flush_all(&self) -> Result<()> {
        for frame_idx in 0..self.page_count {
            let page_id = {
                let mut dir = self.directory.lock();
                let meta = &mut dir.metas[frame_idx];
                match (meta.page_id, meta.dirty, meta.pins) {
                    (Some(page_id), true, 0) => {
                        meta.pin();
                        page_id
                    }
                    _ => continue,
                }
            };
            let frame = self.frames[frame_idx].read();
            let result = self.page_io.write_page(page_id, &frame.bytes);
            if result.is_ok() {
                self.directory.lock().metas[frame_idx].dirty = false;
            }
            drop(frame);
            self.release(frame_idx, false);
            result?;
        }
        Ok(())
    }

    /// Miss path. Claims a frame under the directory lock, then does the
    /// write-back and the read with only the frame latch held.
    fn load_page(
        &self,
        mut dir: parking_lot::MutexGuard<'_, Directory>,
        page_id: u64,
        exclusive: bool,
    ) -> Result<PageGuard<'_>> {
        let (frame_idx, mut latch) = self.claim_frame(&mut dir)?;

        let Directory {
            table,
            metas,
            policy,
            in_flight,
            ..
        } = &mut *dir;
        let meta = &mut metas[frame_idx];
        assert_eq!(meta.pins, 0, "Invariant broken: claimed a pinned frame");
        let evicted = meta.page_id.replace(page_id);
        let write_back = evicted.filter(|_| meta.dirty);
        meta.dirty = false;
        meta.pin();
        if let Some(old) = evicted {
            table.remove(&old);
            trace!(frame_idx, evicted = old, page_id, "evicting page");
        }
        if let Some(old) = write_back {
            in_flight.insert(old);
        }
        table.insert(page_id, frame_idx);
        policy.on_frame_assigned(metas, frame_idx);
        drop(dir);

        if let Some(old) = write_back {
            debug!(frame_idx, page_id = old, "writing back dirty page");
            let result = self.page_io.write_page(old, &latch.bytes);
            let mut dir = self.directory.lock();
            dir.in_flight.remove(&old);
            self.write_back_done.notify_all();
            if let Err(err) = result {
                warn!(page_id = old, error = %err, "write-back failed, keeping page resident");
                let Directory { table, metas, .. } = &mut *dir;
                table.remove(&page_id);
                table.insert(old, frame_idx);
                let meta = &mut metas[frame_idx];
                meta.page_id = Some(old);
                meta.dirty = true;
                meta.unpin();
                return Err(err);
            }
        }

        match self.page_io.read_page(page_id, &mut latch.bytes) {
            Ok(true) => {}
            Ok(false) => latch.bytes.fill(0),
            Err(err) => {
                warn!(page_id, error = %err, "page read failed");
                latch.page_id = None;
                {
                    let mut dir = self.directory.lock();
                    let Directory {
                        table,
                        metas,
                        policy,
                        ..
                    } = &mut *dir;
                    table.remove(&page_id);
                    metas[frame_idx].page_id = None;
                    policy.remove(metas, frame_idx);
                }
                drop(latch);
                self.release(frame_idx, false);
                return Err(err);
            }
        }
        latch.page_id = Some(page_id);

        let latch = if exclusive {
            Latch::Exclusive(latch)
        } else {
            Latch::Shared(RwLockWriteGuard::downgrade(latch))
        };
        Ok(PageGuard {
            manager: self,
            frame_idx,
            page_id,
            latch: Some(latch),
            dirty: false,
        })
    }

    /// Picks a free frame or a victim and latches it exclusively.
    fn claim_frame(
        &self,
        dir: &mut Directory,
    ) -> Result<(usize, RwLockWriteGuard<'_, FrameData>)> {
        if let Some(frame_idx) = dir.free.pop() {
            if let Some(latch) = self.frames[frame_idx].try_write() {
                return Ok((frame_idx, latch));
            }
            //  still latched by a thread on its way out, fall back to eviction
            dir.free.push(frame_idx);
        }
        let frames = &self.frames;
        let Directory { metas, policy, .. } = dir;
        policy
            .evict_frame(metas, |frame_idx, meta| {
                if meta.pins == 0 {
                    frames[frame_idx].try_write()
                } else {
                    None
                }
            })
            .ok_or(Error::BufferFull {
                frames: self.page_count,
            })
    }

    /// Drops one pin and records the dirty flag.
    fn release(&self, frame_idx: usize, dirty: bool) {
        let mut dir = self.directory.lock();
        let meta = &mut dir.metas[frame_idx];
        meta.dirty |= dirty;
        if meta.unpin() && meta.page_id.is_none() {
            meta.dirty = false;
            dir.free.push(frame_idx);
        }
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        let dir = self.directory.get_mut();
        for (frame_idx, meta) in dir.metas.iter_mut().enumerate() {
            let Some(page_id) = meta.page_id else {
                continue;
            };
            if !meta.dirty {
                continue;
            }
            let frame = self.frames[frame_idx].read();
            match self.page_io.write_page(page_id, &frame.bytes) {
                Ok(()) => meta.dirty = false,
                Err(err) => warn!(page_id, error = %err, "failed to write back page on shutdown"),
            }
        }
    }
}

enum Latch<'a> {
    Shared(RwLockReadGuard<'a, FrameData>),
    Exclusive(RwLockWriteGuard<'a, FrameData>),
}

impl<'a> Latch<'a> {
    fn acquire(frame: &'a BufferFrame, exclusive: bool) -> Self {
        if exclusive {
            Self::Exclusive(frame.write())
        } else {
            Self::Shared(frame.read())
        }
    }

    fn frame(&self) -> &FrameData {
        match self {
            Self::Shared(guard) => &**guard,
            Self::Exclusive(guard) => &**guard,
        }
    }
}

/// A fixed page. Releasing the guard unfixes the page.
///
/// Dropping the guard is equivalent to [`BufferManager::unfix_page`] with
/// `is_dirty = false` unless [`PageGuard::mark_dirty`] was called.
pub struct PageGuard<'a> {
    manager: &'a BufferManager,
    frame_idx: usize,
    page_id: u64,
    latch: Option<Latch<'a>>,
    dirty: bool,
}

impl fmt::Debug for PageGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageGuard")
            .field("page_id", &self.page_id)
            .field("frame_idx", &self.frame_idx)
            .field("exclusive", &self.is_exclusive())
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl PageGuard<'_> {
    pub fn page_id(&self) -> u64 {
        self.page_id
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self.latch, Some(Latch::Exclusive(_)))
    }

    pub fn data(&self) -> &[u8] {
        match &self.latch {
            Some(latch) => &latch.frame().bytes[..],
            None => unreachable!("latch is only taken on drop"),
        }
    }

    /// Mutable page bytes. Panics if the page was fixed in shared mode.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.latch {
            Some(Latch::Exclusive(guard)) => &mut guard.bytes[..],
            Some(Latch::Shared(_)) => panic!("page {} is fixed in shared mode", self.page_id),
            None => unreachable!("latch is only taken on drop"),
        }
    }

    /// Records that the page was modified without releasing it.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        //  latch first, the directory lock is never awaited while latched
        self.latch.take();
        self.manager.release(self.frame_idx, self.dirty);
    }
}
