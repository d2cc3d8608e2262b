//! Page-granular disk transfer.
//!
//! Every segment is stored in its own file. A page is assigned the next free
//! offset in its segment file the first time it is written, so pages of a
//! segment are laid out in first-write order rather than by page number.

use std::{
    collections::{hash_map::Entry, HashMap},
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{
    file::{BlockFile, FileMode, PosixFile},
    segment::{local_page_id, segment_id},
    Result, StorageConfig,
};

#[derive(Debug)]
struct SegmentFile {
    file: Arc<PosixFile>,
    /// Local page id -> byte offset.
    offsets: HashMap<u64, u64>,
    next_offset: u64,
    capacity: u64,
}

/// Maps global page ids to byte ranges in per-segment files.
///
/// Shared between buffer managers as an `Arc<PageIo>`. Offsets live in
/// memory only, so a `PageIo` always starts from empty segment files.
#[derive(Debug)]
pub struct PageIo {
    data_dir: Option<PathBuf>,
    page_size: usize,
    sync_writes: bool,
    segments: Mutex<HashMap<u16, SegmentFile>>,
}

impl PageIo {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        config.validate()?;
        if let Some(dir) = &config.data_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(Self {
            data_dir: config.data_dir.clone(),
            page_size: config.page_size,
            sync_writes: config.sync_writes,
            segments: Mutex::new(HashMap::new()),
        })
    }

    /// A `PageIo` backed by temporary files.
    pub fn temporary(page_size: usize) -> Result<Self> {
        Self::new(&StorageConfig::default().with_page_size(page_size))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Name of the file holding `segment_id` inside the data directory.
    pub fn segment_file_name(segment_id: u16) -> String {
        format!("segment_{segment_id}.pages")
    }

    /// Reads the page into `buf`. Returns `false` if the page was never
    /// written, leaving `buf` untouched.
    pub fn read_page(&self, page_id: u64, buf: &mut [u8]) -> Result<bool> {
        assert_eq!(buf.len(), self.page_size, "buffer must hold exactly one page");
        let (file, offset) = {
            let segments = self.segments.lock();
            let Some(segment) = segments.get(&segment_id(page_id)) else {
                return Ok(false);
            };
            let Some(&offset) = segment.offsets.get(&local_page_id(page_id)) else {
                return Ok(false);
            };
            (Arc::clone(&segment.file), offset)
        };
        trace!(page_id, offset, "read page");
        file.read_block(offset, buf)?;
        Ok(true)
    }

    /// Writes the page, assigning it an offset on first write.
    pub fn write_page(&self, page_id: u64, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), self.page_size, "buffer must hold exactly one page");
        let (file, offset) = {
            let mut segments = self.segments.lock();
            let segment_id = segment_id(page_id);
            let segment = match segments.entry(segment_id) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(SegmentFile {
                    file: Arc::new(self.open_segment_file(segment_id)?),
                    offsets: HashMap::new(),
                    next_offset: 0,
                    capacity: 0,
                }),
            };
            let offset = match segment.offsets.get(&local_page_id(page_id)) {
                Some(&offset) => offset,
                None => {
                    let offset = segment.next_offset;
                    let end = offset + self.page_size as u64;
                    if end > segment.capacity {
                        let new_capacity = (segment.capacity * 2).max(end);
                        debug!(
                            segment_id,
                            old = segment.capacity,
                            new = new_capacity,
                            "growing segment file"
                        );
                        segment.file.resize(new_capacity)?;
                        segment.capacity = new_capacity;
                    }
                    segment.next_offset = end;
                    segment.offsets.insert(local_page_id(page_id), offset);
                    offset
                }
            };
            (Arc::clone(&segment.file), offset)
        };
        trace!(page_id, offset, "write page");
        file.write_block(buf, offset)
    }

    /// Size in bytes of the file backing `segment_id`, 0 if never written.
    pub fn segment_file_size(&self, segment_id: u16) -> Result<u64> {
        let file = match self.segments.lock().get(&segment_id) {
            Some(segment) => Arc::clone(&segment.file),
            None => return Ok(0),
        };
        file.size()
    }

    /// Number of distinct pages ever written to `segment_id`.
    pub fn pages_written(&self, segment_id: u16) -> usize {
        self.segments
            .lock()
            .get(&segment_id)
            .map_or(0, |segment| segment.offsets.len())
    }

    fn open_segment_file(&self, segment_id: u16) -> Result<PosixFile> {
        match &self.data_dir {
            Some(dir) => {
                let path = dir.join(Self::segment_file_name(segment_id));
                let file = PosixFile::open_with(&path, FileMode::Write, self.sync_writes)?;
                //  offsets are not persisted, start from an empty file
                file.resize(0)?;
                debug!(segment_id, path = %path.display(), "opened segment file");
                Ok(file)
            }
            None => PosixFile::temporary(),
        }
    }
}

#[cfg(test)]
mod page_io_tests {
    use super::*;
    use crate::{segment::global_page_id, test_utils::TestDir};

    const PAGE_SIZE: usize = 256;

    fn page_of(byte: u8) -> Vec<u8> {
        vec![byte; PAGE_SIZE]
    }

    #[test]
    fn test_unwritten_page_reads_false() {
        let io = PageIo::temporary(PAGE_SIZE).unwrap();
        let mut buf = page_of(0xAA);
        assert!(!io.read_page(global_page_id(3, 7), &mut buf).unwrap());
        assert_eq!(buf, page_of(0xAA));
    }

    #[test]
    fn test_round_trip_across_segments() {
        let io = PageIo::temporary(PAGE_SIZE).unwrap();
        io.write_page(global_page_id(1, 5), &page_of(1)).unwrap();
        io.write_page(global_page_id(2, 5), &page_of(2)).unwrap();
        io.write_page(global_page_id(1, 0), &page_of(3)).unwrap();

        let mut buf = page_of(0);
        assert!(io.read_page(global_page_id(1, 5), &mut buf).unwrap());
        assert_eq!(buf, page_of(1));
        assert!(io.read_page(global_page_id(2, 5), &mut buf).unwrap());
        assert_eq!(buf, page_of(2));
        assert!(io.read_page(global_page_id(1, 0), &mut buf).unwrap());
        assert_eq!(buf, page_of(3));
        assert_eq!(io.pages_written(1), 2);
        assert_eq!(io.pages_written(2), 1);
    }

    #[test]
    fn test_rewrite_keeps_offset() {
        let io = PageIo::temporary(PAGE_SIZE).unwrap();
        let page_id = global_page_id(0, 1);
        io.write_page(page_id, &page_of(1)).unwrap();
        io.write_page(page_id, &page_of(9)).unwrap();
        assert_eq!(io.pages_written(0), 1);
        assert_eq!(io.segment_file_size(0).unwrap(), PAGE_SIZE as u64);
        let mut buf = page_of(0);
        io.read_page(page_id, &mut buf).unwrap();
        assert_eq!(buf, page_of(9));
    }

    #[test]
    fn test_file_grows_geometrically() {
        let io = PageIo::temporary(PAGE_SIZE).unwrap();
        let mut sizes = Vec::new();
        for page in 0..5 {
            io.write_page(global_page_id(4, page), &page_of(page as u8))
                .unwrap();
            sizes.push(io.segment_file_size(4).unwrap() / PAGE_SIZE as u64);
        }
        assert_eq!(sizes, vec![1, 2, 4, 4, 8]);
    }

    #[test]
    fn test_segment_files_in_data_dir() {
        let dir = TestDir::new();
        let config = StorageConfig::new(PAGE_SIZE, 4).with_data_dir(dir.path());
        let io = PageIo::new(&config).unwrap();
        io.write_page(global_page_id(12, 0), &page_of(5)).unwrap();
        assert!(dir.path().join("segment_12.pages").exists());
        assert_eq!(PageIo::segment_file_name(12), "segment_12.pages");
    }
}
