//! B+Tree node pages.
//!
//! Every node starts with `level: u16` at offset 0 and `count: u16` at
//! offset 2. Level 0 marks a leaf.
//!
//! ```text
//! leaf:  | level | count | pad | next: u64 | keys[cap] | values[cap] |
//!        0       2       4     8           16
//! inner: | level | count | pad | children[cap + 1] | keys[cap] |
//!        0       2       4     8
//! ```
//!
//! A leaf's `count` is its number of entries and `next` the local page id of
//! its right sibling (0 for none). An inner node's `count` is its number of
//! children; it holds `count - 1` separator keys, and every key below
//! `children[i]` is `<= keys[i]`.

use std::{cmp::Ordering, marker::PhantomData};

use super::codec::{FixedCodec, KeyComparator};

pub const NODE_HEADER_SIZE: usize = 16;

const LEVEL_OFFSET: usize = 0;
const COUNT_OFFSET: usize = 2;
const NEXT_OFFSET: usize = 8;
const CHILDREN_OFFSET: usize = 8;
const CHILD_SIZE: usize = 8;

pub fn node_level(data: &[u8]) -> u16 {
    read_u16(data, LEVEL_OFFSET)
}

pub fn node_count(data: &[u8]) -> usize {
    read_u16(data, COUNT_OFFSET) as usize
}

pub fn is_leaf(data: &[u8]) -> bool {
    node_level(data) == 0
}

fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn write_u16(data: &mut [u8], at: usize, value: u16) {
    data[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn write_u64(data: &mut [u8], at: usize, value: u64) {
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

/// Number of leading positions in `0..count` for which `is_less` holds,
/// probing with power-of-two strides.
fn lower_bound(count: usize, mut is_less: impl FnMut(usize) -> bool) -> usize {
    if count == 0 {
        return 0;
    }
    let mut step = 1usize << (usize::BITS - 1 - count.leading_zeros());
    let mut pos = 0;
    while step > 0 {
        if pos + step <= count && is_less(pos + step - 1) {
            pos += step;
        }
        step >>= 1;
    }
    pos
}

pub struct LeafNode<B, K, V> {
    data: B,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<B: AsRef<[u8]>, K: FixedCodec, V: FixedCodec> LeafNode<B, K, V> {
    /// Entries a leaf of `page_size` bytes holds.
    pub fn capacity(page_size: usize) -> usize {
        (page_size - NODE_HEADER_SIZE) / (K::SIZE + V::SIZE)
    }

    pub fn new(data: B) -> Self {
        assert!(is_leaf(data.as_ref()), "page is not a leaf node");
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn cap(&self) -> usize {
        Self::capacity(self.bytes().len())
    }

    fn key_offset(&self, idx: usize) -> usize {
        NODE_HEADER_SIZE + idx * K::SIZE
    }

    fn value_offset(&self, idx: usize) -> usize {
        NODE_HEADER_SIZE + self.cap() * K::SIZE + idx * V::SIZE
    }

    pub fn count(&self) -> usize {
        node_count(self.bytes())
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.cap()
    }

    /// Local page id of the right sibling.
    pub fn next(&self) -> Option<u64> {
        let next = read_u64(self.bytes(), NEXT_OFFSET);
        (next != 0).then_some(next)
    }

    pub fn key(&self, idx: usize) -> K {
        K::decode(&self.bytes()[self.key_offset(idx)..])
    }

    pub fn value(&self, idx: usize) -> V {
        V::decode(&self.bytes()[self.value_offset(idx)..])
    }

    pub fn last_key(&self) -> Option<K> {
        self.count().checked_sub(1).map(|idx| self.key(idx))
    }

    /// Index of the first key not less than `key`, and whether it is equal.
    pub fn lower_bound<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> (usize, bool) {
        let count = self.count();
        let idx = lower_bound(count, |i| {
            comparator.compare(&self.key(i), key) == Ordering::Less
        });
        let found = idx < count && comparator.compare(&self.key(idx), key) == Ordering::Equal;
        (idx, found)
    }

    pub fn key_vector(&self) -> Vec<K> {
        (0..self.count()).map(|idx| self.key(idx)).collect()
    }

    pub fn value_vector(&self) -> Vec<V> {
        (0..self.count()).map(|idx| self.value(idx)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: FixedCodec, V: FixedCodec> LeafNode<B, K, V> {
    /// Formats `data` as an empty leaf without a sibling.
    pub fn init(mut data: B) -> Self {
        data.as_mut()[..NODE_HEADER_SIZE].fill(0);
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    fn set_count(&mut self, count: usize) {
        write_u16(self.bytes_mut(), COUNT_OFFSET, count as u16);
    }

    pub fn set_next(&mut self, next: Option<u64>) {
        write_u64(self.bytes_mut(), NEXT_OFFSET, next.unwrap_or(0));
    }

    fn set_key(&mut self, idx: usize, key: &K) {
        let at = self.key_offset(idx);
        key.encode(&mut self.bytes_mut()[at..]);
    }

    fn set_value(&mut self, idx: usize, value: &V) {
        let at = self.value_offset(idx);
        value.encode(&mut self.bytes_mut()[at..]);
    }

    /// Moves entries `from..count` to start at `to`.
    fn shift(&mut self, from: usize, to: usize, count: usize) {
        let (keys, dest) = (self.key_offset(from)..self.key_offset(count), self.key_offset(to));
        self.bytes_mut().copy_within(keys, dest);
        let (values, dest) = (
            self.value_offset(from)..self.value_offset(count),
            self.value_offset(to),
        );
        self.bytes_mut().copy_within(values, dest);
    }

    /// Inserts `key` or overwrites its value, returning the previous one.
    pub fn insert<C: KeyComparator<K>>(&mut self, key: K, value: V, comparator: &C) -> Option<V> {
        let (idx, found) = self.lower_bound(&key, comparator);
        if found {
            let previous = self.value(idx);
            self.set_value(idx, &value);
            return Some(previous);
        }
        let count = self.count();
        assert!(count < self.cap(), "inserting into a full leaf node");
        self.shift(idx, idx + 1, count);
        self.set_key(idx, &key);
        self.set_value(idx, &value);
        self.set_count(count + 1);
        None
    }

    /// Removes `key`, returning whether it was present.
    pub fn erase<C: KeyComparator<K>>(&mut self, key: &K, comparator: &C) -> bool {
        let (idx, found) = self.lower_bound(key, comparator);
        if !found {
            return false;
        }
        let count = self.count();
        self.shift(idx + 1, idx, count);
        self.set_count(count - 1);
        true
    }

    /// Moves the upper half of the entries into `right`, which becomes this
    /// leaf's right sibling at local page `right_page`. Returns the
    /// separator, the last key kept here.
    pub fn split<R>(&mut self, right: R, right_page: u64) -> K
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let count = self.count();
        assert!(count >= 2, "splitting a leaf with {count} entries");
        let keep = count / 2 + 1;
        let moved = count - keep;

        let mut right = LeafNode::<R, K, V>::init(right);
        assert_eq!(right.bytes().len(), self.bytes().len());
        let (src, dst) = (
            self.key_offset(keep)..self.key_offset(count),
            right.key_offset(0)..right.key_offset(moved),
        );
        right.bytes_mut()[dst].copy_from_slice(&self.bytes()[src]);
        let (src, dst) = (
            self.value_offset(keep)..self.value_offset(count),
            right.value_offset(0)..right.value_offset(moved),
        );
        right.bytes_mut()[dst].copy_from_slice(&self.bytes()[src]);
        right.set_count(moved);
        right.set_next(self.next());

        self.set_count(keep);
        self.set_next(Some(right_page));
        self.key(keep - 1)
    }
}

pub struct InnerNode<B, K> {
    data: B,
    _marker: PhantomData<fn() -> K>,
}

impl<B: AsRef<[u8]>, K: FixedCodec> InnerNode<B, K> {
    /// Separator keys an inner node of `page_size` bytes holds. It has room
    /// for one more child than that.
    pub fn capacity(page_size: usize) -> usize {
        (page_size - NODE_HEADER_SIZE) / (K::SIZE + CHILD_SIZE)
    }

    pub fn new(data: B) -> Self {
        assert!(!is_leaf(data.as_ref()), "page is not an inner node");
        Self {
            data,
            _marker: PhantomData,
        }
    }

    fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn cap(&self) -> usize {
        Self::capacity(self.bytes().len())
    }

    fn child_offset(&self, idx: usize) -> usize {
        CHILDREN_OFFSET + idx * CHILD_SIZE
    }

    fn key_offset(&self, idx: usize) -> usize {
        CHILDREN_OFFSET + (self.cap() + 1) * CHILD_SIZE + idx * K::SIZE
    }

    pub fn level(&self) -> u16 {
        node_level(self.bytes())
    }

    /// Number of children.
    pub fn count(&self) -> usize {
        node_count(self.bytes())
    }

    pub fn is_full(&self) -> bool {
        self.count() > self.cap()
    }

    pub fn key(&self, idx: usize) -> K {
        K::decode(&self.bytes()[self.key_offset(idx)..])
    }

    pub fn child(&self, idx: usize) -> u64 {
        read_u64(self.bytes(), self.child_offset(idx))
    }

    /// Index of the first separator not less than `key`, and whether it is
    /// equal.
    pub fn lower_bound<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> (usize, bool) {
        let keys = self.count().saturating_sub(1);
        let idx = lower_bound(keys, |i| {
            comparator.compare(&self.key(i), key) == Ordering::Less
        });
        let found = idx < keys && comparator.compare(&self.key(idx), key) == Ordering::Equal;
        (idx, found)
    }

    /// Index of the child whose subtree covers `key`.
    pub fn child_index<C: KeyComparator<K>>(&self, key: &K, comparator: &C) -> usize {
        self.lower_bound(key, comparator).0
    }

    pub fn key_vector(&self) -> Vec<K> {
        (0..self.count().saturating_sub(1))
            .map(|idx| self.key(idx))
            .collect()
    }

    pub fn child_vector(&self) -> Vec<u64> {
        (0..self.count()).map(|idx| self.child(idx)).collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>, K: FixedCodec> InnerNode<B, K> {
    /// Formats `data` as an inner node at `level` with a single child.
    pub fn init(mut data: B, level: u16, first_child: u64) -> Self {
        assert!(level > 0);
        data.as_mut()[..NODE_HEADER_SIZE].fill(0);
        let mut node = Self {
            data,
            _marker: PhantomData,
        };
        write_u16(node.bytes_mut(), LEVEL_OFFSET, level);
        node.set_count(1);
        node.set_child(0, first_child);
        node
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    fn set_count(&mut self, count: usize) {
        write_u16(self.bytes_mut(), COUNT_OFFSET, count as u16);
    }

    pub fn set_key(&mut self, idx: usize, key: &K) {
        let at = self.key_offset(idx);
        key.encode(&mut self.bytes_mut()[at..]);
    }

    fn set_child(&mut self, idx: usize, child: u64) {
        let at = self.child_offset(idx);
        write_u64(self.bytes_mut(), at, child);
    }

    fn shift_keys(&mut self, from: usize, to: usize, end: usize) {
        let (src, dest) = (self.key_offset(from)..self.key_offset(end), self.key_offset(to));
        self.bytes_mut().copy_within(src, dest);
    }

    fn shift_children(&mut self, from: usize, to: usize, end: usize) {
        let (src, dest) = (
            self.child_offset(from)..self.child_offset(end),
            self.child_offset(to),
        );
        self.bytes_mut().copy_within(src, dest);
    }

    /// Adds the result of a child split: `separator` bounds the old child and
    /// `right_child` follows it.
    pub fn insert_split<C: KeyComparator<K>>(
        &mut self,
        separator: K,
        right_child: u64,
        comparator: &C,
    ) {
        let count = self.count();
        assert!(count <= self.cap(), "inserting into a full inner node");
        let (idx, _) = self.lower_bound(&separator, comparator);
        self.shift_keys(idx, idx + 1, count - 1);
        self.shift_children(idx + 1, idx + 2, count);
        self.set_key(idx, &separator);
        self.set_child(idx + 1, right_child);
        self.set_count(count + 1);
    }

    /// Moves the upper half of the children into `right` and returns the
    /// separator between the halves.
    pub fn split<R>(&mut self, right: R) -> K
    where
        R: AsRef<[u8]> + AsMut<[u8]>,
    {
        let count = self.count();
        assert!(count >= 2, "splitting an inner node with {count} children");
        let keep = count / 2;
        let moved = count - keep;

        let mut right = InnerNode::<R, K>::init(right, self.level(), self.child(keep));
        assert_eq!(right.bytes().len(), self.bytes().len());
        let (src, dst) = (
            self.child_offset(keep)..self.child_offset(count),
            right.child_offset(0)..right.child_offset(moved),
        );
        right.bytes_mut()[dst].copy_from_slice(&self.bytes()[src]);
        let (src, dst) = (
            self.key_offset(keep)..self.key_offset(count - 1),
            right.key_offset(0)..right.key_offset(moved - 1),
        );
        right.bytes_mut()[dst].copy_from_slice(&self.bytes()[src]);
        right.set_count(moved);

        self.set_count(keep);
        self.key(keep - 1)
    }

    /// Drops child `idx` together with one of the separators next to it.
    pub fn remove_child(&mut self, idx: usize) {
        let count = self.count();
        assert!(idx < count, "removing child {idx} of {count}");
        if count > 1 {
            let key_idx = if idx + 1 < count { idx } else { idx - 1 };
            self.shift_keys(key_idx + 1, key_idx, count - 1);
            self.shift_children(idx + 1, idx, count);
        }
        self.set_count(count - 1);
    }
}

#[cfg(test)]
mod node_tests {
    use super::*;
    use crate::btree::codec::NaturalOrder;

    const PAGE_SIZE: usize = 1024;

    type Leaf<'a> = LeafNode<&'a mut [u8], u64, u64>;
    type Inner<'a> = InnerNode<&'a mut [u8], u64>;

    #[test]
    fn test_capacity() {
        assert_eq!(LeafNode::<&[u8], u64, u64>::capacity(PAGE_SIZE), 63);
        assert_eq!(InnerNode::<&[u8], u64>::capacity(PAGE_SIZE), 63);
        assert_eq!(LeafNode::<&[u8], u32, u64>::capacity(PAGE_SIZE), 84);
        assert_eq!(LeafNode::<&[u8], u64, u64>::capacity(1 << 16), 4095);
    }

    #[test]
    fn test_lower_bound_strides() {
        let keys = [1, 3, 5, 7, 9, 11, 13];
        for count in 0..=keys.len() {
            for target in 0..16 {
                let expected = keys[..count].iter().filter(|&&k| k < target).count();
                assert_eq!(lower_bound(count, |i| keys[i] < target), expected);
            }
        }
    }

    #[test]
    fn test_leaf_insert_keeps_keys_sorted() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut leaf = Leaf::init(&mut buf[..]);
        let n = Leaf::capacity(PAGE_SIZE) as u64;
        for i in (0..n).rev() {
            assert_eq!(leaf.insert(i, 2 * i, &NaturalOrder), None);
            assert_eq!(leaf.count() as u64, n - i);
        }
        assert!(leaf.is_full());
        assert_eq!(leaf.key_vector(), (0..n).collect::<Vec<_>>());
        assert_eq!(leaf.value_vector(), (0..n).map(|i| 2 * i).collect::<Vec<_>>());

        assert_eq!(leaf.insert(5, 0, &NaturalOrder), Some(10));
        assert_eq!(leaf.value(5), 0);
        assert_eq!(leaf.count() as u64, n);
    }

    #[test]
    #[should_panic(expected = "full leaf")]
    fn test_leaf_overflow_panics() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut leaf = Leaf::init(&mut buf[..]);
        for i in 0..=Leaf::capacity(PAGE_SIZE) as u64 {
            leaf.insert(i, i, &NaturalOrder);
        }
    }

    #[test]
    fn test_leaf_erase() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut leaf = Leaf::init(&mut buf[..]);
        for i in 0..10u64 {
            leaf.insert(i, i + 100, &NaturalOrder);
        }
        assert!(leaf.erase(&4, &NaturalOrder));
        assert!(!leaf.erase(&4, &NaturalOrder));
        assert!(!leaf.erase(&42, &NaturalOrder));
        assert_eq!(leaf.key_vector(), vec![0, 1, 2, 3, 5, 6, 7, 8, 9]);
        assert_eq!(leaf.value(4), 105);
        assert_eq!(leaf.lower_bound(&4, &NaturalOrder), (4, false));
        assert_eq!(leaf.lower_bound(&5, &NaturalOrder), (4, true));
    }

    #[test]
    fn test_leaf_split() {
        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = Leaf::init(&mut left_buf[..]);
        left.set_next(Some(9));
        let n = Leaf::capacity(PAGE_SIZE) as u64;
        for i in 0..n {
            left.insert(i, 2 * i, &NaturalOrder);
        }

        let separator = left.split(&mut right_buf[..], 7);
        assert_eq!(separator, n / 2);
        assert_eq!(left.count() as u64, n / 2 + 1);
        assert_eq!(left.next(), Some(7));
        assert_eq!(left.key_vector(), (0..=n / 2).collect::<Vec<_>>());
        assert_eq!(left.last_key(), Some(separator));

        let right = LeafNode::<&[u8], u64, u64>::new(&right_buf[..]);
        assert_eq!(right.count() as u64, n - n / 2 - 1);
        assert_eq!(right.next(), Some(9));
        assert_eq!(right.key_vector(), (n / 2 + 1..n).collect::<Vec<_>>());
        assert_eq!(
            right.value_vector(),
            (n / 2 + 1..n).map(|i| 2 * i).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_inner_insert_split_and_routing() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut inner = Inner::init(&mut buf[..], 1, 100);
        inner.insert_split(50, 101, &NaturalOrder);
        inner.insert_split(20, 102, &NaturalOrder);
        inner.insert_split(80, 103, &NaturalOrder);
        assert_eq!(inner.key_vector(), vec![20, 50, 80]);
        assert_eq!(inner.child_vector(), vec![100, 102, 101, 103]);

        let route = |key: u64| inner.child(inner.child_index(&key, &NaturalOrder));
        assert_eq!(route(0), 100);
        assert_eq!(route(20), 100);
        assert_eq!(route(21), 102);
        assert_eq!(route(50), 102);
        assert_eq!(route(80), 101);
        assert_eq!(route(81), 103);
    }

    #[test]
    fn test_inner_split() {
        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut inner = Inner::init(&mut left_buf[..], 2, 1000);
        let cap = Inner::capacity(PAGE_SIZE) as u64;
        for i in 0..cap {
            inner.insert_split(10 * i, 1001 + i, &NaturalOrder);
        }
        assert!(inner.is_full());
        let count = inner.count() as u64;

        let separator = inner.split(&mut right_buf[..]);
        let keep = count / 2;
        assert_eq!(inner.count() as u64, keep);
        assert_eq!(separator, 10 * (keep - 1));
        assert_eq!(inner.key_vector(), (0..keep - 1).map(|i| 10 * i).collect::<Vec<_>>());

        let right = InnerNode::<&[u8], u64>::new(&right_buf[..]);
        assert_eq!(right.level(), 2);
        assert_eq!(right.count() as u64, count - keep);
        assert_eq!(right.child(0), 1000 + keep);
        assert_eq!(right.key_vector(), (keep..cap).map(|i| 10 * i).collect::<Vec<_>>());
        assert_eq!(
            right.child_vector(),
            (keep..count).map(|i| 1000 + i).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_inner_remove_child() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut inner = Inner::init(&mut buf[..], 1, 100);
        for (key, child) in [(10, 101), (20, 102), (30, 103)] {
            inner.insert_split(key, child, &NaturalOrder);
        }

        // the right neighbour takes over the removed child's key range
        inner.remove_child(1);
        assert_eq!(inner.key_vector(), vec![10, 30]);
        assert_eq!(inner.child_vector(), vec![100, 102, 103]);

        inner.remove_child(2);
        assert_eq!(inner.key_vector(), vec![10]);
        assert_eq!(inner.child_vector(), vec![100, 102]);

        inner.remove_child(0);
        assert_eq!(inner.child_vector(), vec![102]);
        inner.remove_child(0);
        assert_eq!(inner.count(), 0);
    }
}
