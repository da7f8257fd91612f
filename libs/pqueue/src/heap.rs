//! Array-backed binary max-heap that keeps every node's slot index inside the node itself.
//!
//! Knowing a node's position is what makes [`Heap::fix`] and [`Heap::remove_at`] O(log n) for
//! arbitrary members instead of only the root. All methods assume the caller already holds
//! exclusive access; locking is the business of [`crate::PriorityQueue`].

use std::cmp::Ordering;

use crate::{
    Entry,
    error::{QueueError, Result},
};

#[derive(Debug)]
struct Node<P> {
    /// Index of this node in [`Heap::nodes`]. Written by [`Heap::push`], [`Heap::swap`] and
    /// [`Heap::rebuild`].
    position: usize,
    entry: Entry<P>,
}

impl<P> Node<P> {
    /// Consumes the node once it has left the store, so its position cannot be used again.
    fn into_entry(self) -> Entry<P> {
        self.entry
    }
}

/// Invariants held between public calls:
/// - `nodes[(i - 1) / 2].priority >= nodes[i].priority` for every `i > 0`
/// - `nodes[i].position == i` for every `i`
#[derive(Debug)]
pub(crate) struct Heap<P> {
    nodes: Vec<Node<P>>,
}

impl<P> Heap<P> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends `entry` and sifts it up to its place. O(log n)
    pub fn push(&mut self, entry: Entry<P>) {
        let position = self.nodes.len();
        self.nodes.push(Node { position, entry });
        self.sift_up(position);
    }

    /// Removes the most urgent entry. O(log n)
    pub fn pop(&mut self) -> Result<Entry<P>> {
        let Some(last) = self.nodes.len().checked_sub(1) else {
            return Err(QueueError::EmptyQueue);
        };
        self.swap(0, last);
        let node = self.nodes.pop().ok_or(QueueError::EmptyQueue)?;
        if !self.nodes.is_empty() {
            self.sift_down(0);
        }
        Ok(node.into_entry())
    }

    /// Restores the heap property around `position` after its priority was changed.
    /// At most one direction is needed: if the node does not move up it is sifted down.
    pub fn fix(&mut self, position: usize) {
        debug_assert!(
            position < self.nodes.len(),
            "fix at {position} on a heap of length {}",
            self.nodes.len()
        );
        if position >= self.nodes.len() {
            return;
        }
        if !self.sift_up(position) {
            self.sift_down(position);
        }
    }

    /// Removes the entry at an arbitrary position. O(log n)
    ///
    /// The last node takes over the vacated slot and is fixed in whichever direction its new
    /// neighbourhood requires.
    pub fn remove_at(&mut self, position: usize) -> Result<Entry<P>> {
        let len = self.nodes.len();
        if position >= len {
            return Err(QueueError::PositionOutOfRange { position, len });
        }
        let last = len - 1;
        self.swap(position, last);
        let node = self
            .nodes
            .pop()
            .ok_or(QueueError::PositionOutOfRange { position, len })?;
        if position != last {
            self.fix(position);
        }
        Ok(node.into_entry())
    }

    /// Sets the priority of the node at `position` and fixes it in place.
    pub fn reprioritize(&mut self, position: usize, priority: i64) -> Result<()> {
        let len = self.nodes.len();
        let node = self
            .nodes
            .get_mut(position)
            .ok_or(QueueError::PositionOutOfRange { position, len })?;
        node.entry.priority = priority;
        self.fix(position);
        Ok(())
    }

    /// Sets `priority` on every entry matching `pred` in one pass, then rebuilds the heap.
    /// Returns the number of matches. O(n)
    pub fn reprioritize_where(&mut self, pred: impl Fn(&Entry<P>) -> bool, priority: i64) -> usize {
        let mut matched = 0;
        for node in self.nodes.iter_mut().filter(|node| pred(&node.entry)) {
            node.entry.priority = priority;
            matched += 1;
        }
        if matched > 0 {
            self.rebuild();
        }
        matched
    }

    /// Drops every entry matching `pred` in one pass, then rebuilds the heap.
    /// Returns the number of removed entries. O(n)
    pub fn remove_where(&mut self, pred: impl Fn(&Entry<P>) -> bool) -> usize {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.nodes)
            .into_iter()
            .partition(|node| pred(&node.entry));
        self.nodes = kept;
        if !removed.is_empty() {
            self.rebuild();
        }
        // Payloads are dropped only once the store is consistent again.
        removed.len()
    }

    /// Reassigns every position and heapifies bottom-up. O(n)
    fn rebuild(&mut self) {
        for (position, node) in self.nodes.iter_mut().enumerate() {
            node.position = position;
        }
        for position in (0..self.nodes.len() / 2).rev() {
            self.sift_down(position);
        }
    }

    /// Position of the first node in backing-store order whose entry satisfies `pred`. O(n)
    pub fn locate(&self, pred: impl Fn(&Entry<P>) -> bool) -> Option<usize> {
        self.nodes
            .iter()
            .find(|node| pred(&node.entry))
            .map(|node| node.position)
    }

    /// Drops every entry and releases the backing allocation.
    pub fn release(&mut self) -> usize {
        let released = self.nodes.len();
        self.nodes = Vec::new();
        released
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.nodes.swap(a, b);
        self.nodes[a].position = a;
        self.nodes[b].position = b;
    }

    fn is_more_urgent(&self, a: usize, b: usize) -> bool {
        self.nodes[a].entry.urgency(&self.nodes[b].entry) == Ordering::Greater
    }

    /// Returns whether the node moved.
    fn sift_up(&mut self, mut position: usize) -> bool {
        let start = position;
        while position > 0 {
            let parent = (position - 1) / 2;
            if !self.is_more_urgent(position, parent) {
                break;
            }
            self.swap(position, parent);
            position = parent;
        }
        position != start
    }

    fn sift_down(&mut self, mut position: usize) {
        let len = self.nodes.len();
        loop {
            let left = 2 * position + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let child = if right < len && self.is_more_urgent(right, left) {
                right
            } else {
                left
            };
            if !self.is_more_urgent(child, position) {
                break;
            }
            self.swap(position, child);
            position = child;
        }
    }
}

impl<P> Default for Heap<P> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[cfg(test)]
impl<P> Heap<P> {
    /// Entries in backing-store order (not priority order).
    pub fn iter(&self) -> impl Iterator<Item = &Entry<P>> {
        self.nodes.iter().map(|node| &node.entry)
    }

    /// Panics if either the heap property or position consistency is violated.
    pub fn assert_invariants(&self) {
        for (i, node) in self.nodes.iter().enumerate() {
            assert_eq!(node.position, i, "node at slot {i} believes it is at {}", node.position);
            if i > 0 {
                let parent = &self.nodes[(i - 1) / 2];
                assert!(
                    parent.entry.priority >= node.entry.priority,
                    "parent of slot {i} has priority {} < {}",
                    parent.entry.priority,
                    node.entry.priority
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};

    use super::Heap;
    use crate::{Entry, QueueError};

    fn heap_with(priorities: &[i64]) -> Heap<()> {
        let mut heap = Heap::default();
        for (i, &p) in priorities.iter().enumerate() {
            heap.push(Entry::without_payload(&format!("e{i}"), "g", p));
            heap.assert_invariants();
        }
        heap
    }

    fn drain(heap: &mut Heap<()>) -> Vec<i64> {
        let mut out = vec![];
        while let Ok(entry) = heap.pop() {
            heap.assert_invariants();
            out.push(entry.priority);
        }
        out
    }

    #[test]
    fn pop_descending() {
        let mut heap = heap_with(&[3, 9, 1, 7, 5, 10, 2, 8, 4, 6]);
        assert_eq!(drain(&mut heap), vec![10, 9, 8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn pop_empty() {
        let mut heap: Heap<()> = Heap::default();
        assert_eq!(heap.pop(), Err(QueueError::EmptyQueue));
        assert!(heap.is_empty());
    }

    #[test]
    fn remove_at_out_of_range() {
        let mut heap = heap_with(&[1, 2]);
        assert_eq!(
            heap.remove_at(2),
            Err(QueueError::PositionOutOfRange {
                position: 2,
                len: 2
            })
        );
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn remove_last_slot() {
        let mut heap = heap_with(&[5, 4, 3]);
        let removed = heap.remove_at(2).unwrap();
        assert_eq!(removed.priority, 3);
        heap.assert_invariants();
        assert_eq!(drain(&mut heap), vec![5, 4]);
    }

    /// The last node may need to move up after it takes over a slot deep in another subtree.
    #[test]
    fn remove_at_moves_replacement_up() {
        // slot layout: [100, 50, 90, 10, 20, 80, 85]
        let mut heap = heap_with(&[100, 50, 90, 10, 20, 80, 85]);
        let pos = heap.locate(|e| e.priority == 10).unwrap();
        heap.remove_at(pos).unwrap();
        heap.assert_invariants();
        assert_eq!(drain(&mut heap), vec![100, 90, 85, 80, 50, 20]);
    }

    #[test]
    fn reprioritize_both_directions() {
        let mut heap = heap_with(&[1, 2, 3, 4, 5, 6, 7]);

        let pos = heap.locate(|e| e.priority == 1).unwrap();
        heap.reprioritize(pos, 100).unwrap();
        heap.assert_invariants();

        let pos = heap.locate(|e| e.priority == 7).unwrap();
        heap.reprioritize(pos, -1).unwrap();
        heap.assert_invariants();

        assert_eq!(drain(&mut heap), vec![100, 6, 5, 4, 3, 2, -1]);
    }

    #[test]
    fn locate_returns_first_in_store_order() {
        let mut heap: Heap<()> = Heap::default();
        heap.push(Entry::without_payload("dup", "a", 1));
        heap.push(Entry::without_payload("dup", "b", 2));

        let pos = heap.locate(|e| e.primary_key == "dup").unwrap();
        let first = heap.iter().next().unwrap();
        assert_eq!(pos, 0);
        assert_eq!(first.group_key, "b");
        assert!(heap.locate(|e| e.primary_key == "missing").is_none());
    }

    #[test]
    fn reprioritize_where_rebuilds() {
        let mut heap: Heap<()> = Heap::default();
        for i in 0..1_000 {
            let group = if i % 3 == 0 { "every-third" } else { "rest" };
            heap.push(Entry::without_payload(&format!("e{i}"), group, i));
        }

        assert_eq!(heap.reprioritize_where(|e| e.group_key == "every-third", 500), 334);
        heap.assert_invariants();
        assert_eq!(heap.reprioritize_where(|e| e.group_key == "missing", 1), 0);

        let mut drained = vec![];
        while let Ok(entry) = heap.pop() {
            drained.push(entry);
        }
        assert!(drained.windows(2).all(|w| w[0].priority >= w[1].priority));
        assert!(
            drained
                .iter()
                .filter(|e| e.group_key == "every-third")
                .all(|e| e.priority == 500)
        );
    }

    #[test]
    fn remove_where_rebuilds() {
        let mut heap: Heap<()> = Heap::default();
        for i in 0..1_000 {
            let group = if i % 2 == 0 { "even" } else { "odd" };
            heap.push(Entry::without_payload(&format!("e{i}"), group, (i * 37) % 101));
        }

        assert_eq!(heap.remove_where(|e| e.group_key == "even"), 500);
        heap.assert_invariants();
        assert_eq!(heap.len(), 500);
        assert!(heap.iter().all(|e| e.group_key == "odd"));
        assert_eq!(heap.remove_where(|e| e.group_key == "even"), 0);
    }

    #[test]
    #[should_panic(expected = "fix at 3")]
    #[cfg(debug_assertions)]
    fn fix_out_of_range_panics_in_debug() {
        let mut heap = heap_with(&[1, 2, 3]);
        heap.fix(3);
    }

    #[test]
    fn release_empties_store() {
        let mut heap = heap_with(&[1, 2, 3]);
        assert_eq!(heap.release(), 3);
        assert!(heap.is_empty());
        assert_eq!(heap.release(), 0);
    }

    #[test]
    fn randomized_operations_keep_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut heap: Heap<()> = Heap::default();
        let mut expected_len = 0usize;

        for i in 0..2_000 {
            match rng.random_range(0..4) {
                0 | 1 => {
                    heap.push(Entry::without_payload(
                        &format!("e{i}"),
                        "g",
                        rng.random_range(-50..50),
                    ));
                    expected_len += 1;
                }
                2 if !heap.is_empty() => {
                    let pos = rng.random_range(0..heap.len());
                    heap.remove_at(pos).unwrap();
                    expected_len -= 1;
                }
                3 if !heap.is_empty() => {
                    let pos = rng.random_range(0..heap.len());
                    heap.reprioritize(pos, rng.random_range(-50..50)).unwrap();
                }
                _ => {}
            }
            heap.assert_invariants();
            assert_eq!(heap.len(), expected_len);
        }

        let drained = drain(&mut heap);
        assert!(drained.windows(2).all(|w| w[0] >= w[1]));
    }
}
