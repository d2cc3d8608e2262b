//! Error types for the storage core.

use std::io;

use thiserror::Error;

/// Result type used by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the buffer manager, segments and the B+Tree.
///
/// Resource exhaustion is reported to the immediate caller and never retried
/// internally. Whether to retry (for example after other threads unfixed
/// their pages) is the caller's decision.
#[derive(Debug, Error)]
pub enum Error {
    /// Every frame of the buffer manager is pinned.
    #[error("buffer is full: all {frames} frames are pinned")]
    BufferFull { frames: usize },

    /// A slotted page cannot hold the requested bytes, even after compaction.
    #[error("page full: {requested} bytes requested, {available} bytes free")]
    PageFull { requested: u32, available: u32 },

    /// A record can never fit on a single page of the configured size.
    #[error("record of {size} bytes exceeds the page capacity of {max} bytes")]
    RecordTooLarge { size: u32, max: u32 },

    /// The 48-bit local page space of a segment is exhausted.
    #[error("segment {segment_id} cannot grow beyond {pages} pages")]
    SegmentFull { segment_id: u16, pages: u64 },

    /// A TID addressed a slot that does not hold a record.
    #[error("invalid slot {slot} on page {page}")]
    InvalidSlot { page: u64, slot: u16 },

    /// A write was attempted on a file opened in read mode.
    #[error("file {path} is opened read-only")]
    ReadOnly { path: String },

    /// Invalid storage configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Underlying file operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true for the resource exhaustion family of errors.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            Self::BufferFull { .. }
                | Self::PageFull { .. }
                | Self::RecordTooLarge { .. }
                | Self::SegmentFull { .. }
        )
    }

    /// Returns true if repeating the same call later may succeed.
    ///
    /// Only a full buffer is transient: it clears as soon as some other
    /// thread unfixes a page.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BufferFull { .. })
    }
}
