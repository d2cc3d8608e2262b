//! Free-space inventory.
//!
//! Tracks, with 4 bits per slotted page, roughly how many bytes each page of
//! a record segment has left, and routes allocations to a page that can hold
//! them.
//!
//! Local page 0 of the FSI segment is a header holding the number of
//! allocated slotted pages and one candidate page per free-space class.
//! Local pages `1..` are bitmaps, each covering `2 * page_size` slotted pages
//! (the even page of a pair in the low nibble).

use std::sync::Arc;

use tracing::trace;

use crate::{
    buffer_manager::BufferManager, segment::MAX_LOCAL_PAGE_ID, slotted_page::HEADER_SIZE,
    Result, Segment,
};

pub const FREE_SPACE_CLASSES: usize = 16;

const HEADER_PAGE: u64 = 0;
const ALLOCATED_OFFSET: usize = 0;
const CACHE_OFFSET: usize = 8;

/// Stored as `page + 1`, so a never-written header reads as all unknown.
const CACHE_UNKNOWN: u64 = 0;
const CACHE_NONE: u64 = u64::MAX;

/// Half-logarithmic free-space classes relative to the page size.
///
/// The lower half of the classes covers `[0, max / 8)` on a logarithmic
/// scale, the upper half splits `[max / 8, max]` into equal steps, where
/// `max` is the free space of an empty slotted page.
#[derive(Debug, Clone)]
pub struct FreeSpaceEncoding {
    boundaries: [u32; FREE_SPACE_CLASSES],
}

impl FreeSpaceEncoding {
    pub fn new(page_size: usize) -> Self {
        let max = (page_size - HEADER_SIZE) as u32;
        let mut boundaries = [0u32; FREE_SPACE_CLASSES];
        for (class, boundary) in boundaries.iter_mut().enumerate().skip(1) {
            *boundary = if class < 8 {
                (max / 8) >> (8 - class)
            } else {
                (max as u64 * (class as u64 - 7) / 8) as u32
            };
        }
        for class in 1..FREE_SPACE_CLASSES {
            boundaries[class] = boundaries[class].max(boundaries[class - 1] + 1);
        }
        Self { boundaries }
    }

    /// Largest class whose lower bound does not exceed `free_space`.
    pub fn encode(&self, free_space: u32) -> u8 {
        self.boundaries
            .iter()
            .rposition(|&boundary| boundary <= free_space)
            .unwrap_or(0) as u8
    }

    /// Guaranteed free space of a page in `class`.
    pub fn decode(&self, class: u8) -> u32 {
        self.boundaries[class as usize]
    }

    /// Smallest class whose pages surely hold `required` bytes, or `None` if
    /// even the top class does not guarantee it.
    pub fn required_class(&self, required: u32) -> Option<u8> {
        self.boundaries
            .iter()
            .position(|&boundary| boundary >= required)
            .map(|class| class as u8)
    }
}

#[derive(Debug)]
pub struct FsiSegment {
    segment: Segment,
    encoding: FreeSpaceEncoding,
}

impl FsiSegment {
    pub fn new(segment_id: u16, buffer_manager: Arc<BufferManager>) -> Self {
        let encoding = FreeSpaceEncoding::new(buffer_manager.page_size());
        Self {
            segment: Segment::new(segment_id, buffer_manager),
            encoding,
        }
    }

    pub fn segment_id(&self) -> u16 {
        self.segment.segment_id()
    }

    pub fn encoding(&self) -> &FreeSpaceEncoding {
        &self.encoding
    }

    fn pages_per_bitmap(&self) -> u64 {
        2 * self.segment.page_size() as u64
    }

    /// Bitmap page, byte offset and nibble shift of a slotted page's entry.
    fn locate(&self, page: u64) -> (u64, usize, u32) {
        let per_bitmap = self.pages_per_bitmap();
        let index = page % per_bitmap;
        (1 + page / per_bitmap, (index / 2) as usize, (index % 2) as u32 * 4)
    }

    fn read_class(&self, page: u64) -> Result<u8> {
        let (bitmap_page, byte, shift) = self.locate(page);
        let bitmap = self.segment.fix_page(bitmap_page, false)?;
        Ok((bitmap.data()[byte] >> shift) & 0x0F)
    }

    /// Number of slotted pages known to the inventory.
    pub fn allocated_pages(&self) -> Result<u64> {
        let header = self.segment.fix_page(HEADER_PAGE, false)?;
        Ok(read_u64(header.data(), ALLOCATED_OFFSET))
    }

    /// Free-space class currently recorded for `page`.
    pub fn free_space_class(&self, page: u64) -> Result<u8> {
        self.read_class(page)
    }

    /// Records that `target_page` now has `free_space` bytes free.
    ///
    /// Updating the first unallocated page adds it to the inventory.
    pub fn update(&self, target_page: u64, free_space: u32) -> Result<()> {
        let class = self.encoding.encode(free_space);
        let mut header = self.segment.fix_page(HEADER_PAGE, true)?;
        {
            let (bitmap_page, byte, shift) = self.locate(target_page);
            let mut bitmap = self.segment.fix_page(bitmap_page, true)?;
            let entry = &mut bitmap.data_mut()[byte];
            *entry = (*entry & !(0x0F << shift)) | (class << shift);
            bitmap.mark_dirty();
        }

        let data = header.data_mut();
        let allocated = read_u64(data, ALLOCATED_OFFSET);
        if target_page >= allocated {
            write_u64(data, ALLOCATED_OFFSET, target_page + 1);
        }
        for candidate_class in 0..FREE_SPACE_CLASSES {
            let at = CACHE_OFFSET + candidate_class * 8;
            let entry = read_u64(data, at);
            if candidate_class <= class as usize {
                if entry == CACHE_UNKNOWN || entry == CACHE_NONE {
                    write_u64(data, at, target_page + 1);
                }
            } else if entry == target_page + 1 {
                write_u64(data, at, CACHE_UNKNOWN);
            }
        }
        header.mark_dirty();
        Ok(())
    }

    /// A page with at least `required_space` bytes free, or the next
    /// unallocated page. `None` once the segment's page space is exhausted.
    pub fn find(&self, required_space: u32) -> Result<Option<u64>> {
        let mut header = self.segment.fix_page(HEADER_PAGE, true)?;
        let allocated = read_u64(header.data(), ALLOCATED_OFFSET);
        let next_unallocated = (allocated <= MAX_LOCAL_PAGE_ID).then_some(allocated);

        let Some(class) = self.encoding.required_class(required_space) else {
            return Ok(next_unallocated);
        };
        let at = CACHE_OFFSET + class as usize * 8;
        match read_u64(header.data(), at) {
            CACHE_NONE => return Ok(next_unallocated),
            CACHE_UNKNOWN => {}
            entry => {
                let candidate = entry - 1;
                if candidate < allocated && self.read_class(candidate)? >= class {
                    return Ok(Some(candidate));
                }
            }
        }

        trace!(class, allocated, "free space cache miss, scanning inventory");
        let found = self.scan(allocated, class)?;
        let entry = found.map_or(CACHE_NONE, |page| page + 1);
        write_u64(header.data_mut(), at, entry);
        header.mark_dirty();
        Ok(found.or(next_unallocated))
    }

    fn scan(&self, allocated: u64, class: u8) -> Result<Option<u64>> {
        let per_bitmap = self.pages_per_bitmap();
        let mut page = 0;
        while page < allocated {
            let (bitmap_page, _, _) = self.locate(page);
            let bitmap = self.segment.fix_page(bitmap_page, false)?;
            let end = allocated.min((page / per_bitmap + 1) * per_bitmap);
            while page < end {
                let (_, byte, shift) = self.locate(page);
                if (bitmap.data()[byte] >> shift) & 0x0F >= class {
                    return Ok(Some(page));
                }
                page += 1;
            }
        }
        Ok(None)
    }
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn write_u64(data: &mut [u8], at: usize, value: u64) {
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod fsi_segment_tests {
    use super::*;

    const PAGE_SIZE: usize = 1024;

    fn fsi() -> FsiSegment {
        let bm = Arc::new(BufferManager::temporary(PAGE_SIZE, 16).unwrap());
        FsiSegment::new(2, bm)
    }

    #[test]
    fn test_encoding_is_monotonic_and_conservative() {
        for page_size in [256, 1024, 4096, 8192, 1 << 20] {
            let encoding = FreeSpaceEncoding::new(page_size);
            let max = (page_size - HEADER_SIZE) as u32;
            assert_eq!(encoding.decode(0), 0);
            assert_eq!(encoding.decode(15), max);
            for class in 1..16u8 {
                assert!(encoding.decode(class) > encoding.decode(class - 1));
                assert_eq!(encoding.encode(encoding.decode(class)), class);
            }
            for free in (0..=max).step_by(7) {
                assert!(encoding.decode(encoding.encode(free)) <= free);
            }
        }
    }

    #[test]
    fn test_encoding_4k_boundaries() {
        let encoding = FreeSpaceEncoding::new(4096);
        let boundaries: Vec<u32> = (0..16).map(|c| encoding.decode(c)).collect();
        assert_eq!(
            boundaries,
            vec![0, 3, 7, 15, 31, 63, 127, 255, 510, 1021, 1531, 2042, 2552, 3063, 3573, 4084]
        );
        assert_eq!(encoding.required_class(4084), Some(15));
        assert_eq!(encoding.required_class(4085), None);
        assert_eq!(encoding.required_class(600), Some(9));
        assert_eq!(encoding.required_class(0), Some(0));
    }

    #[test]
    fn test_empty_inventory_returns_first_page() {
        let fsi = fsi();
        assert_eq!(fsi.allocated_pages().unwrap(), 0);
        assert_eq!(fsi.find(100).unwrap(), Some(0));
        assert_eq!(fsi.find(100).unwrap(), Some(0));
    }

    #[test]
    fn test_update_extends_allocation() {
        let fsi = fsi();
        fsi.update(0, 1000).unwrap();
        assert_eq!(fsi.allocated_pages().unwrap(), 1);
        assert_eq!(fsi.find(500).unwrap(), Some(0));

        fsi.update(0, 20).unwrap();
        assert_eq!(fsi.find(500).unwrap(), Some(1));
        assert_eq!(fsi.find(10).unwrap(), Some(0));
    }

    #[test]
    fn test_find_prefers_pages_with_room() {
        let fsi = fsi();
        for page in 0..5 {
            fsi.update(page, 50).unwrap();
        }
        fsi.update(3, 900).unwrap();
        assert_eq!(fsi.find(800).unwrap(), Some(3));
        assert_eq!(fsi.find(20).unwrap(), Some(0));

        fsi.update(3, 10).unwrap();
        assert_eq!(fsi.find(800).unwrap(), Some(5));
        fsi.update(1, 1012).unwrap();
        assert_eq!(fsi.find(800).unwrap(), Some(1));
    }

    #[test]
    fn test_nibbles_do_not_clobber_neighbours() {
        let fsi = fsi();
        fsi.update(0, 1012).unwrap();
        fsi.update(1, 0).unwrap();
        fsi.update(2, 300).unwrap();
        assert_eq!(fsi.free_space_class(0).unwrap(), 15);
        assert_eq!(fsi.free_space_class(1).unwrap(), 0);
        assert_eq!(
            fsi.free_space_class(2).unwrap(),
            fsi.encoding().encode(300)
        );
    }

    #[test]
    fn test_pages_beyond_first_bitmap() {
        let fsi = fsi();
        let pages = 2 * PAGE_SIZE as u64 + 10;
        for page in 0..pages {
            fsi.update(page, 0).unwrap();
        }
        fsi.update(pages - 3, 700).unwrap();
        assert_eq!(fsi.allocated_pages().unwrap(), pages);
        assert_eq!(fsi.find(600).unwrap(), Some(pages - 3));
        assert_eq!(fsi.find(1000).unwrap(), Some(pages));
    }
}
