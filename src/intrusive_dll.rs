//! Index-linked doubly-linked lists over a node arena.
//!
//! Nodes live in a caller-owned slice and store the `prev`/`next` indices of
//! their neighbours. A list only tracks its head and tail, so the same arena
//! can host several disjoint lists (the FIFO and LRU queues of the buffer
//! manager share the frame metadata array).

pub(crate) trait IntrusiveNode {
    fn prev(&self) -> Option<usize>;
    fn set_prev(&mut self, prev: Option<usize>);
    fn next(&self) -> Option<usize>;
    fn set_next(&mut self, next: Option<usize>);
}

#[derive(Debug, Default)]
pub(crate) struct IntrusiveList {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl IntrusiveList {
    pub(crate) fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the index of the node at the head
    #[cfg(test)]
    pub(crate) fn peek_head(&self) -> Option<usize> {
        self.head
    }

    /// Get the index of the node at the tail
    #[cfg(test)]
    pub(crate) fn peek_tail(&self) -> Option<usize> {
        self.tail
    }

    /// Append an unlinked node at the tail of the list.
    pub(crate) fn push_back<T: IntrusiveNode>(&mut self, nodes: &mut [T], index: usize) {
        assert!(
            nodes[index].prev().is_none() && nodes[index].next().is_none(),
            "Invariant broken: node {} is still linked",
            index
        );
        match self.tail {
            Some(tail) => {
                nodes[tail].set_next(Some(index));
                nodes[index].set_prev(Some(tail));
                self.tail = Some(index);
            }
            None => {
                //  ensure invariants are maintained
                assert!(self.head.is_none());
                self.head = Some(index);
                self.tail = Some(index);
            }
        }
        self.len += 1;
    }

    /// Unlink a node that is a member of this list.
    pub(crate) fn remove<T: IntrusiveNode>(&mut self, nodes: &mut [T], index: usize) {
        assert!(
            self.len > 0,
            "Invariant broken: removing a node from an empty list"
        );
        let prev = nodes[index].prev();
        let next = nodes[index].next();
        match prev {
            Some(prev) => nodes[prev].set_next(next),
            None => {
                assert_eq!(self.head, Some(index), "Invariant broken: node is not the head");
                self.head = next;
            }
        }
        match next {
            Some(next) => nodes[next].set_prev(prev),
            None => {
                assert_eq!(self.tail, Some(index), "Invariant broken: node is not the tail");
                self.tail = prev;
            }
        }
        nodes[index].set_prev(None);
        nodes[index].set_next(None);
        self.len -= 1;
    }

    /// Move a member node to the tail. No-op if it already is the tail.
    pub(crate) fn move_to_back<T: IntrusiveNode>(&mut self, nodes: &mut [T], index: usize) {
        if self.tail == Some(index) {
            return;
        }
        self.remove(nodes, index);
        self.push_back(nodes, index);
    }

    /// Iterate node indices from head to tail.
    pub(crate) fn iter<'a, T: IntrusiveNode>(&self, nodes: &'a [T]) -> Iter<'a, T> {
        Iter {
            nodes,
            current: self.head,
        }
    }
}

pub(crate) struct Iter<'a, T> {
    nodes: &'a [T],
    current: Option<usize>,
}

impl<T: IntrusiveNode> Iterator for Iter<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let index = self.current?;
        self.current = self.nodes[index].next();
        Some(index)
    }
}

#[cfg(test)]
mod intrusive_dll_tests {
    use std::collections::HashSet;

    use crate::intrusive_dll::{IntrusiveList, IntrusiveNode};

    struct Node<T> {
        #[allow(dead_code)]
        data: T,
        prev: Option<usize>,
        next: Option<usize>,
    }

    impl<T> Node<T> {
        fn new(data: T) -> Self {
            Self {
                data,
                prev: None,
                next: None,
            }
        }
    }

    impl<T> IntrusiveNode for Node<T> {
        fn prev(&self) -> Option<usize> {
            self.prev
        }

        fn set_prev(&mut self, prev: Option<usize>) {
            self.prev = prev
        }

        fn next(&self) -> Option<usize> {
            self.next
        }

        fn set_next(&mut self, next: Option<usize>) {
            self.next = next
        }
    }

    fn create_list_with_values<T: Clone>(values: &[T]) -> (IntrusiveList, Vec<Node<T>>) {
        let mut list = IntrusiveList::new();
        let mut nodes: Vec<_> = values.iter().cloned().map(Node::new).collect();
        for idx in 0..nodes.len() {
            list.push_back(&mut nodes, idx);
        }
        (list, nodes)
    }

    fn assert_list_integrity<T>(list: &IntrusiveList, nodes: &[Node<T>]) {
        match (list.head, list.tail) {
            (None, None) => {
                assert_eq!(list.len, 0);
                return;
            }
            (Some(head), Some(tail)) => {
                assert!(head < nodes.len(), "Invariant broken: head {} out of bounds", head);
                assert!(tail < nodes.len(), "Invariant broken: tail {} out of bounds", tail);
            }
            _ => panic!("Invariant broken: head and tail must both be defined or both be None"),
        }

        let mut seen = HashSet::new();
        let mut current_idx = list.head;
        let mut expected_prev = None;
        let mut last = None;
        while let Some(idx) = current_idx {
            assert!(seen.insert(idx), "Invariant broken: cycle detected at index {}", idx);
            assert_eq!(
                nodes[idx].prev, expected_prev,
                "Invariant broken: node {} has prev {:?}, expected {:?}",
                idx, nodes[idx].prev, expected_prev
            );
            last = Some(idx);
            current_idx = nodes[idx].next;
            expected_prev = Some(idx);
        }
        assert_eq!(last, list.tail, "Invariant broken: tail does not match last visited node");
        assert_eq!(seen.len(), list.len, "Invariant broken: length mismatch");
    }

    #[test]
    fn test_basic_functionality() {
        let (list, nodes) = create_list_with_values(&[1, 2, 3, 4, 5]);
        assert_list_integrity(&list, &nodes);
        assert_eq!(list.peek_head(), Some(0));
        assert_eq!(list.peek_tail(), Some(4));
        assert_eq!(list.len(), 5);
        assert_eq!(list.iter(&nodes).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_head_middle_tail() {
        let (mut list, mut nodes) = create_list_with_values(&[1, 2, 3, 4, 5]);
        list.remove(&mut nodes, 2);
        assert_list_integrity(&list, &nodes);
        list.remove(&mut nodes, 0);
        assert_list_integrity(&list, &nodes);
        list.remove(&mut nodes, 4);
        assert_list_integrity(&list, &nodes);
        assert_eq!(list.iter(&nodes).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(nodes[2].prev, None);
        assert_eq!(nodes[2].next, None);
    }

    #[test]
    fn test_move_to_back() {
        let (mut list, mut nodes) = create_list_with_values(&[1, 2, 3]);
        list.move_to_back(&mut nodes, 0);
        assert_list_integrity(&list, &nodes);
        assert_eq!(list.iter(&nodes).collect::<Vec<_>>(), vec![1, 2, 0]);
        list.move_to_back(&mut nodes, 0);
        assert_eq!(list.iter(&nodes).collect::<Vec<_>>(), vec![1, 2, 0]);
        list.move_to_back(&mut nodes, 2);
        assert_list_integrity(&list, &nodes);
        assert_eq!(list.iter(&nodes).collect::<Vec<_>>(), vec![1, 0, 2]);
    }

    #[test]
    fn test_two_lists_share_one_arena() {
        let mut nodes: Vec<_> = (0..6).map(Node::new).collect();
        let mut evens = IntrusiveList::new();
        let mut odds = IntrusiveList::new();
        for idx in 0..6 {
            if idx % 2 == 0 {
                evens.push_back(&mut nodes, idx);
            } else {
                odds.push_back(&mut nodes, idx);
            }
        }
        evens.remove(&mut nodes, 2);
        odds.push_back(&mut nodes, 2);
        assert_list_integrity(&evens, &nodes);
        assert_list_integrity(&odds, &nodes);
        assert_eq!(evens.iter(&nodes).collect::<Vec<_>>(), vec![0, 4]);
        assert_eq!(odds.iter(&nodes).collect::<Vec<_>>(), vec![1, 3, 5, 2]);
    }

    #[test]
    fn test_single_node() {
        let (mut list, mut nodes) = create_list_with_values(&[42]);
        assert_list_integrity(&list, &nodes);
        list.move_to_back(&mut nodes, 0);
        assert_list_integrity(&list, &nodes);
        list.remove(&mut nodes, 0);
        assert!(list.is_empty());
        assert_list_integrity(&list, &nodes);
    }

    #[test]
    #[should_panic(expected = "Invariant broken: removing a node from an empty list")]
    fn test_remove_from_empty_list_panics() {
        let mut list = IntrusiveList::new();
        let mut nodes = vec![Node::new(1)];
        list.remove(&mut nodes, 0);
    }

    #[test]
    #[should_panic(expected = "is still linked")]
    fn test_double_push_panics() {
        let (mut list, mut nodes) = create_list_with_values(&[1, 2]);
        list.push_back(&mut nodes, 0);
    }
}
