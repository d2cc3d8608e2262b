//! Buffer replacement policy.
//!
//! Frames are tracked by a two-queue policy: a page enters the FIFO queue on
//! its first load and is promoted to the LRU queue when it is fixed again
//! while resident. Victims are taken from the FIFO queue first, so pages
//! touched only once (scans) are evicted before the working set.
//!
//! # Interface
//!
//! `PolicyState` exposes the hooks the buffer manager drives:
//! - `record_hit()`: a resident page was fixed again
//! - `on_frame_assigned()`: a frame was loaded with a new page
//! - `remove()`: a frame no longer holds a page
//! - `evict_frame()`: selects and unlinks a victim frame

mod two_queue;

pub(crate) use two_queue::{PolicyState, Queue};
