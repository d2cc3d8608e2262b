//! Storage configuration.
//!
//! The default page size is fixed at compile time through Cargo features,
//! exactly one of `page-4k`, `page-8k` or `page-1m`. Individual buffer
//! managers can still be built with another page size, which the B+Tree tests
//! use to get small 1 KiB nodes.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[cfg(feature = "page-4k")]
pub const DEFAULT_PAGE_SIZE: usize = 4096;
#[cfg(feature = "page-8k")]
pub const DEFAULT_PAGE_SIZE: usize = 8192;
#[cfg(feature = "page-1m")]
pub const DEFAULT_PAGE_SIZE: usize = 1024 * 1024;

#[cfg(not(any(feature = "page-4k", feature = "page-8k", feature = "page-1m")))]
compile_error!(
    "One of `page-4k`, `page-8k`, or `page-1m` features must be enabled to select a page size."
);

#[cfg(any(
    all(feature = "page-4k", feature = "page-8k"),
    all(feature = "page-4k", feature = "page-1m"),
    all(feature = "page-8k", feature = "page-1m"),
))]
compile_error!("Enable only one page size feature (`page-4k`, `page-8k`, or `page-1m`)");

/// Smallest page that still fits a slotted page header, a few slots and a
/// B+Tree node with a useful fanout.
pub const MIN_PAGE_SIZE: usize = 256;

/// Slot offsets and sizes are stored in 24 bits, and a zero-length record
/// at the page end takes offset `page_size`.
pub const MAX_PAGE_SIZE: usize = (1 << 24) - 8;

/// Default number of frames in a buffer manager.
pub const DEFAULT_PAGE_COUNT: usize = 1024;

/// Configuration shared by [`PageIo`](crate::PageIo) and
/// [`BufferManager`](crate::BufferManager).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding one file per segment. `None` keeps every segment in
    /// an anonymous temporary file that disappears with the `PageIo`.
    pub data_dir: Option<PathBuf>,
    /// Size in bytes of every page.
    pub page_size: usize,
    /// Maximum number of pages resident in memory at the same time.
    pub page_count: usize,
    /// Open segment files with synchronous writes (`O_SYNC` on Linux).
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            page_size: DEFAULT_PAGE_SIZE,
            page_count: DEFAULT_PAGE_COUNT,
            sync_writes: false,
        }
    }
}

impl StorageConfig {
    pub fn new(page_size: usize, page_count: usize) -> Self {
        Self {
            page_size,
            page_count,
            ..Self::default()
        }
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_page_count(mut self, page_count: usize) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    /// Checks the invariants the page layouts rely on.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(Error::config(format!(
                "page size {} outside of [{MIN_PAGE_SIZE}, {MAX_PAGE_SIZE}]",
                self.page_size
            )));
        }
        if self.page_size % 8 != 0 {
            return Err(Error::config(format!(
                "page size {} is not a multiple of 8",
                self.page_size
            )));
        }
        if self.page_count == 0 {
            return Err(Error::config("page count must be at least 1"));
        }
        Ok(())
    }
}
