//! A concurrent B+Tree over fixed-size keys and values.
//!
//! The root always lives at local page 0 of the tree's segment. Readers
//! descend with shared latch coupling, writers with exclusive coupling and
//! proactive splits, so no operation ever needs to climb back up the tree
//! while holding latches.
//!
//! Nodes are only ever removed from the tree once they are empty; the pages
//! themselves are never reused.

mod codec;
mod node;

use std::{
    cmp::Ordering,
    marker::PhantomData,
    sync::{
        atomic::{self, AtomicU64},
        Arc,
    },
};

use tracing::{debug, trace};

pub use codec::{FixedCodec, KeyComparator, NaturalOrder, ReverseOrder};
pub use node::{is_leaf, node_count, node_level, InnerNode, LeafNode, NODE_HEADER_SIZE};

use crate::{
    buffer_manager::{BufferManager, PageGuard},
    segment::{local_page_id, MAX_LOCAL_PAGE_ID},
    Error, Result, Segment,
};

pub const ROOT_PAGE: u64 = 0;

/// An ancestor kept latched during an erase.
struct PathEntry<'a> {
    page: PageGuard<'a>,
    child_idx: usize,
    /// The separator above the descent path equals the erased key.
    refresh_separator: bool,
}

pub struct BTree<K, V, C = NaturalOrder> {
    segment: Segment,
    comparator: C,
    next_page: AtomicU64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> BTree<K, V, NaturalOrder>
where
    K: FixedCodec + Ord,
    V: FixedCodec,
{
    /// Creates an empty tree in `segment_id`.
    pub fn new(segment_id: u16, buffer_manager: Arc<BufferManager>) -> Result<Self> {
        Self::with_comparator(segment_id, buffer_manager, NaturalOrder)
    }
}

impl<K, V, C> BTree<K, V, C>
where
    K: FixedCodec,
    V: FixedCodec,
    C: KeyComparator<K>,
{
    pub fn with_comparator(
        segment_id: u16,
        buffer_manager: Arc<BufferManager>,
        comparator: C,
    ) -> Result<Self> {
        let page_size = buffer_manager.page_size();
        if LeafNode::<&[u8], K, V>::capacity(page_size) < 2
            || InnerNode::<&[u8], K>::capacity(page_size) < 2
        {
            return Err(Error::config(format!(
                "page size {page_size} cannot hold two {}-byte keys with {}-byte values",
                K::SIZE,
                V::SIZE
            )));
        }

        let tree = Self {
            segment: Segment::new(segment_id, buffer_manager),
            comparator,
            next_page: AtomicU64::new(ROOT_PAGE + 1),
            _marker: PhantomData,
        };
        let mut root = tree.segment.fix_page(ROOT_PAGE, true)?;
        LeafNode::<_, K, V>::init(root.data_mut());
        root.mark_dirty();
        drop(root);
        Ok(tree)
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn leaf_capacity(&self) -> usize {
        LeafNode::<&[u8], K, V>::capacity(self.segment.page_size())
    }

    /// Separator keys per inner node.
    pub fn inner_capacity(&self) -> usize {
        InnerNode::<&[u8], K>::capacity(self.segment.page_size())
    }

    /// Fixes a node page in shared mode, for inspection.
    pub fn fix_node(&self, local_page: u64) -> Result<PageGuard<'_>> {
        self.segment.fix_page(local_page, false)
    }

    pub fn lookup(&self, key: &K) -> Result<Option<V>> {
        let mut page = self.segment.fix_page(ROOT_PAGE, false)?;
        loop {
            let next = if is_leaf(page.data()) {
                let leaf = LeafNode::<_, K, V>::new(page.data());
                let (idx, found) = leaf.lower_bound(key, &self.comparator);
                if found {
                    return Ok(Some(leaf.value(idx)));
                }
                match leaf.next() {
                    Some(sibling) if idx == leaf.count() => sibling,
                    _ => return Ok(None),
                }
            } else {
                let inner = InnerNode::<_, K>::new(page.data());
                inner.child(inner.child_index(key, &self.comparator))
            };
            page = self.segment.fix_page(next, false)?;
        }
    }

    /// Inserts `key`, overwriting the value of an existing entry.
    pub fn insert(&self, key: K, value: V) -> Result<()> {
        let mut node = self.segment.fix_page(ROOT_PAGE, true)?;
        if self.is_full(node.data()) {
            self.split_root(&mut node)?;
        }

        loop {
            if is_leaf(node.data()) {
                LeafNode::<_, K, V>::new(node.data_mut()).insert(key, value, &self.comparator);
                node.mark_dirty();
                return Ok(());
            }

            let child_page = {
                let inner = InnerNode::<_, K>::new(node.data());
                inner.child(inner.child_index(&key, &self.comparator))
            };
            let mut child = self.segment.fix_page(child_page, true)?;
            if self.is_full(child.data()) {
                let (separator, right_page, right) = self.split_node(&mut child)?;
                InnerNode::<_, K>::new(node.data_mut()).insert_split(
                    separator,
                    right_page,
                    &self.comparator,
                );
                node.mark_dirty();
                if self.comparator.compare(&key, &separator) == Ordering::Greater {
                    child = right;
                }
            }
            node = child;
        }
    }

    /// Removes `key` if present.
    pub fn erase(&self, key: &K) -> Result<()> {
        let mut path: Vec<PathEntry<'_>> = Vec::new();
        let mut node = self.segment.fix_page(ROOT_PAGE, true)?;
        while !is_leaf(node.data()) {
            let (child_idx, child_page, refresh_separator) = {
                let inner = InnerNode::<_, K>::new(node.data());
                let (idx, found) = inner.lower_bound(key, &self.comparator);
                (idx, inner.child(idx), found)
            };
            let child = self.segment.fix_page(child_page, true)?;
            path.push(PathEntry {
                page: node,
                child_idx,
                refresh_separator,
            });
            //  nothing above a node that keeps a child changes structurally
            if node_count(child.data()) > 1 {
                path.retain(|entry| entry.refresh_separator);
            }
            node = child;
        }

        let last_key = {
            let mut leaf = LeafNode::<_, K, V>::new(node.data_mut());
            if !leaf.erase(key, &self.comparator) {
                return Ok(());
            }
            leaf.last_key()
        };
        node.mark_dirty();

        if let Some(last_key) = last_key {
            for entry in path.iter_mut().filter(|entry| entry.refresh_separator) {
                InnerNode::<_, K>::new(entry.page.data_mut()).set_key(entry.child_idx, &last_key);
                entry.page.mark_dirty();
            }
            return Ok(());
        }

        trace!(page = local_page_id(node.page_id()), "leaf emptied");
        drop(node);
        while let Some(mut entry) = path.pop() {
            let remaining = {
                let mut inner = InnerNode::<_, K>::new(entry.page.data_mut());
                inner.remove_child(entry.child_idx);
                inner.count()
            };
            entry.page.mark_dirty();
            if remaining > 0 {
                return Ok(());
            }
            if local_page_id(entry.page.page_id()) == ROOT_PAGE {
                LeafNode::<_, K, V>::init(entry.page.data_mut());
                debug!("tree emptied, root reset to a leaf");
                return Ok(());
            }
        }
        Ok(())
    }

    fn is_full(&self, data: &[u8]) -> bool {
        if is_leaf(data) {
            LeafNode::<_, K, V>::new(data).is_full()
        } else {
            InnerNode::<_, K>::new(data).is_full()
        }
    }

    fn allocate_page(&self) -> Result<u64> {
        let page = self.next_page.fetch_add(1, atomic::Ordering::Relaxed);
        if page > MAX_LOCAL_PAGE_ID {
            return Err(Error::SegmentFull {
                segment_id: self.segment.segment_id(),
                pages: MAX_LOCAL_PAGE_ID + 1,
            });
        }
        Ok(page)
    }

    /// Splits `node` into itself and a fresh right sibling, returning the
    /// separator, the sibling's page and its latched guard.
    fn split_node<'a>(&'a self, node: &mut PageGuard<'a>) -> Result<(K, u64, PageGuard<'a>)> {
        let right_page = self.allocate_page()?;
        let mut right = self.segment.fix_page(right_page, true)?;
        let separator = if is_leaf(node.data()) {
            LeafNode::<_, K, V>::new(node.data_mut()).split(right.data_mut(), right_page)
        } else {
            InnerNode::<_, K>::new(node.data_mut()).split(right.data_mut())
        };
        node.mark_dirty();
        right.mark_dirty();
        debug!(
            page = local_page_id(node.page_id()),
            right_page,
            level = node_level(node.data()),
            "split node"
        );
        Ok((separator, right_page, right))
    }

    /// Moves the root's content to a new page, splits it and turns the root
    /// into an inner node one level higher over the two halves.
    fn split_root(&self, root: &mut PageGuard<'_>) -> Result<()> {
        let level = node_level(root.data());
        let left_page = self.allocate_page()?;
        let mut left = self.segment.fix_page(left_page, true)?;
        left.data_mut().copy_from_slice(root.data());
        left.mark_dirty();
        let (separator, right_page, right) = self.split_node(&mut left)?;
        drop(right);
        drop(left);

        let mut inner = InnerNode::<_, K>::init(root.data_mut(), level + 1, left_page);
        inner.insert_split(separator, right_page, &self.comparator);
        root.mark_dirty();
        debug!(level = level + 1, left_page, right_page, "split root");
        Ok(())
    }
}
