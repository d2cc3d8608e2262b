//! FIFO/LRU two-queue replacement.
//!
//! # Algorithm
//!
//! - On allocation: append the frame to the FIFO tail
//! - On hit: move the frame to the LRU tail (from FIFO or from inside LRU)
//! - On eviction: scan FIFO from head, then LRU from head, returning the
//!   first frame the caller manages to claim
//!
//! # Complexity
//!
//! - Hit and allocation: O(1)
//! - Eviction: O(n) worst case if most frames are pinned

use crate::{buffer_manager::FrameMeta, intrusive_dll::IntrusiveList};

/// Queue membership of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Queue {
    None,
    Fifo,
    Lru,
}

#[derive(Debug, Default)]
pub(crate) struct PolicyState {
    fifo: IntrusiveList,
    lru: IntrusiveList,
}

impl PolicyState {
    pub(crate) fn new() -> Self {
        Self {
            fifo: IntrusiveList::new(),
            lru: IntrusiveList::new(),
        }
    }

    /// Promotes a resident frame to the LRU tail.
    pub(crate) fn record_hit(&mut self, metas: &mut [FrameMeta], frame_idx: usize) {
        match metas[frame_idx].queue {
            Queue::Fifo => {
                self.fifo.remove(metas, frame_idx);
                self.lru.push_back(metas, frame_idx);
                metas[frame_idx].queue = Queue::Lru;
            }
            Queue::Lru => self.lru.move_to_back(metas, frame_idx),
            Queue::None => panic!("Invariant broken: hit on frame {frame_idx} outside any queue"),
        }
    }

    /// Appends a freshly loaded frame to the FIFO tail.
    pub(crate) fn on_frame_assigned(&mut self, metas: &mut [FrameMeta], frame_idx: usize) {
        assert_eq!(
            metas[frame_idx].queue,
            Queue::None,
            "Invariant broken: assigned frame {frame_idx} is still queued"
        );
        self.fifo.push_back(metas, frame_idx);
        metas[frame_idx].queue = Queue::Fifo;
    }

    /// Unlinks a frame from whichever queue holds it.
    pub(crate) fn remove(&mut self, metas: &mut [FrameMeta], frame_idx: usize) {
        match metas[frame_idx].queue {
            Queue::Fifo => self.fifo.remove(metas, frame_idx),
            Queue::Lru => self.lru.remove(metas, frame_idx),
            Queue::None => return,
        }
        metas[frame_idx].queue = Queue::None;
    }

    /// Selects a victim frame for eviction.
    ///
    /// `claim` is offered candidates in eviction order and returns `Some`
    /// once it has secured a frame (unpinned and latched). The claimed frame
    /// is unlinked before returning. Returns `None` if no frame could be
    /// claimed.
    pub(crate) fn evict_frame<G>(
        &mut self,
        metas: &mut [FrameMeta],
        mut claim: impl FnMut(usize, &FrameMeta) -> Option<G>,
    ) -> Option<(usize, G)> {
        let mut victim = None;
        for list in [&self.fifo, &self.lru] {
            for frame_idx in list.iter(metas) {
                if let Some(guard) = claim(frame_idx, &metas[frame_idx]) {
                    victim = Some((frame_idx, guard));
                    break;
                }
            }
            if victim.is_some() {
                break;
            }
        }
        let (frame_idx, guard) = victim?;
        self.remove(metas, frame_idx);
        Some((frame_idx, guard))
    }

    /// Frame indices of the FIFO queue, head first.
    pub(crate) fn fifo_frames(&self, metas: &[FrameMeta]) -> Vec<usize> {
        self.fifo.iter(metas).collect()
    }

    /// Frame indices of the LRU queue, head first.
    pub(crate) fn lru_frames(&self, metas: &[FrameMeta]) -> Vec<usize> {
        self.lru.iter(metas).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.fifo.len() + self.lru.len()
    }
}

#[cfg(test)]
mod two_queue_tests {
    use super::*;

    fn metas(n: usize) -> Vec<FrameMeta> {
        (0..n).map(|_| FrameMeta::new()).collect()
    }

    fn unpinned(_: usize, meta: &FrameMeta) -> Option<()> {
        (meta.pins == 0).then_some(())
    }

    #[test]
    fn test_new_frames_enter_fifo() {
        let mut metas = metas(3);
        let mut policy = PolicyState::new();
        for idx in 0..3 {
            policy.on_frame_assigned(&mut metas, idx);
        }
        assert_eq!(policy.fifo_frames(&metas), vec![0, 1, 2]);
        assert!(policy.lru_frames(&metas).is_empty());
        assert_eq!(policy.len(), 3);
    }

    #[test]
    fn test_hits_promote_to_lru_tail() {
        let mut metas = metas(3);
        let mut policy = PolicyState::new();
        for idx in 0..3 {
            policy.on_frame_assigned(&mut metas, idx);
        }
        policy.record_hit(&mut metas, 1);
        policy.record_hit(&mut metas, 0);
        assert_eq!(policy.fifo_frames(&metas), vec![2]);
        assert_eq!(policy.lru_frames(&metas), vec![1, 0]);

        policy.record_hit(&mut metas, 1);
        assert_eq!(policy.lru_frames(&metas), vec![0, 1]);
        assert_eq!(metas[1].queue, Queue::Lru);
    }

    #[test]
    fn test_eviction_prefers_fifo_head() {
        let mut metas = metas(4);
        let mut policy = PolicyState::new();
        for idx in 0..4 {
            policy.on_frame_assigned(&mut metas, idx);
        }
        policy.record_hit(&mut metas, 0);
        metas[1].pins = 1;

        let (victim, ()) = policy.evict_frame(&mut metas, unpinned).unwrap();
        assert_eq!(victim, 2);
        assert_eq!(metas[2].queue, Queue::None);
        assert_eq!(policy.fifo_frames(&metas), vec![1, 3]);
    }

    #[test]
    fn test_eviction_falls_back_to_lru() {
        let mut metas = metas(3);
        let mut policy = PolicyState::new();
        for idx in 0..3 {
            policy.on_frame_assigned(&mut metas, idx);
        }
        policy.record_hit(&mut metas, 2);
        policy.record_hit(&mut metas, 1);
        metas[0].pins = 2;

        let (victim, ()) = policy.evict_frame(&mut metas, unpinned).unwrap();
        assert_eq!(victim, 2);
        assert_eq!(policy.lru_frames(&metas), vec![1]);
    }

    #[test]
    fn test_no_victim_when_all_pinned() {
        let mut metas = metas(2);
        let mut policy = PolicyState::new();
        for idx in 0..2 {
            policy.on_frame_assigned(&mut metas, idx);
            metas[idx].pins = 1;
        }
        assert!(policy.evict_frame(&mut metas, unpinned).is_none());
        assert_eq!(policy.len(), 2);
    }
}
