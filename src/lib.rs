//! Storage core of a disk-based relational database.
//!
//! Pages flow `BTree` / `SpSegment` -> [`Segment`] -> [`BufferManager`] ->
//! [`PageIo`] -> [`file::BlockFile`]. The buffer manager caches a fixed number
//! of pages and is the only component that decides which pages are resident
//! and who may modify them.

pub mod benchmark_framework;
pub mod btree;
pub mod buffer_manager;
pub mod config;
pub mod error;
pub mod file;
pub mod fsi_segment;
mod intrusive_dll;
pub mod page_io;
mod replacement;
pub mod schema;
pub mod segment;
pub mod slotted_page;
pub mod sp_segment;
#[doc(hidden)]
pub mod test_utils;

pub use btree::{BTree, FixedCodec, KeyComparator, NaturalOrder};
pub use buffer_manager::{BufferManager, BufferStats, PageGuard};
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use fsi_segment::FsiSegment;
pub use page_io::PageIo;
pub use schema::Table;
pub use segment::Segment;
pub use slotted_page::{Slot, SlottedPage, Tid};
pub use sp_segment::SpSegment;
