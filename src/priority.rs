// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Binary min-heap used wherever "earliest event wins".
//!
//! The TTL cache keys this queue by entry expiry to decide which entry to
//! evict first. `std::collections::BinaryHeap` is a max-heap without
//! arbitrary removal, which the cache needs when an entry's expiry is
//! rewritten in place, so the heap is implemented directly.
//!
//! # Example
//!
//! ```
//! use swr_engine::PriorityQueue;
//!
//! let mut queue = PriorityQueue::new();
//! for n in [3, 1, 2] {
//!     queue.push(n);
//! }
//! assert_eq!(queue.peek(), Some(&1));
//! assert_eq!(queue.pop(), Some(1));
//! assert_eq!(queue.pop(), Some(2));
//! assert_eq!(queue.pop(), Some(3));
//! assert_eq!(queue.pop(), None);
//! ```

/// Min-heap over `Ord`. Equal-priority items are returned in heap order,
/// not insertion order.
///
/// The `Ord` bound sits on the operations, not the type, so containers
/// can embed a `PriorityQueue<T>` without repeating the bound.
#[derive(Debug, Clone, Default)]
pub struct PriorityQueue<T> {
    heap: Vec<T>,
}

impl<T: Ord> PriorityQueue<T> {
    #[must_use]
    pub fn new() -> Self {
        Self { heap: Vec::new() }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
        }
    }

    /// Insert an item. O(log n).
    pub fn push(&mut self, item: T) {
        self.heap.push(item);
        self.sift_up(self.heap.len() - 1);
    }

    /// Remove and return the minimum. O(log n).
    pub fn pop(&mut self) -> Option<T> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let min = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        min
    }

    /// Non-destructive read of the minimum. O(1).
    #[must_use]
    pub fn peek(&self) -> Option<&T> {
        self.heap.first()
    }

    /// Remove the first occurrence equal to `item`, anywhere in the heap.
    /// O(n) scan plus O(log n) repair. Returns whether an item was removed.
    pub fn remove(&mut self, item: &T) -> bool {
        let Some(pos) = self.heap.iter().position(|x| x == item) else {
            return false;
        };
        let last = self.heap.len() - 1;
        self.heap.swap(pos, last);
        self.heap.pop();
        if pos < self.heap.len() {
            // The swapped-in element may violate the heap in either direction.
            self.sift_down(pos);
            self.sift_up(pos);
        }
        true
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    fn sift_up(&mut self, mut idx: usize) {
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if self.heap[idx] >= self.heap[parent] {
                break;
            }
            self.heap.swap(idx, parent);
            idx = parent;
        }
    }

    fn sift_down(&mut self, mut idx: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            let right = 2 * idx + 2;
            let mut smallest = idx;
            if left < len && self.heap[left] < self.heap[smallest] {
                smallest = left;
            }
            if right < len && self.heap[right] < self.heap[smallest] {
                smallest = right;
            }
            if smallest == idx {
                break;
            }
            self.heap.swap(idx, smallest);
            idx = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_ascending_regardless_of_push_order() {
        let mut queue = PriorityQueue::new();
        for n in [3, 1, 2, 5, 4] {
            queue.push(n);
        }
        let mut popped = Vec::new();
        while let Some(n) = queue.pop() {
            popped.push(n);
        }
        assert_eq!(popped, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_peek_is_non_destructive() {
        let mut queue = PriorityQueue::new();
        queue.push(2);
        queue.push(1);
        assert_eq!(queue.peek(), Some(&1));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(1));
    }

    #[test]
    fn test_pop_empty_returns_none() {
        let mut queue: PriorityQueue<i32> = PriorityQueue::new();
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.peek(), None);
    }

    #[test]
    fn test_remove_interior_item_repairs_heap() {
        let mut queue = PriorityQueue::new();
        for n in [5, 3, 8, 1, 9, 7] {
            queue.push(n);
        }
        assert!(queue.remove(&8));
        assert!(!queue.remove(&8), "already removed");

        let mut popped = Vec::new();
        while let Some(n) = queue.pop() {
            popped.push(n);
        }
        assert_eq!(popped, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_remove_root_and_last() {
        let mut queue = PriorityQueue::new();
        for n in [4, 2, 6] {
            queue.push(n);
        }
        assert!(queue.remove(&2), "root");
        assert!(queue.remove(&6), "a leaf");
        assert_eq!(queue.pop(), Some(4));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_duplicates_allowed() {
        let mut queue = PriorityQueue::new();
        queue.push(1);
        queue.push(1);
        queue.push(0);
        assert_eq!(queue.pop(), Some(0));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(1));
    }

    #[test]
    fn test_remove_only_first_equal_occurrence() {
        let mut queue = PriorityQueue::new();
        queue.push(7);
        queue.push(7);
        assert!(queue.remove(&7));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop(), Some(7));
    }

    #[test]
    fn test_embeddable_without_ord_bound_on_container() {
        struct Holder<T> {
            queue: PriorityQueue<T>,
        }
        let mut holder = Holder {
            queue: PriorityQueue::<i32>::new(),
        };
        holder.queue.push(1);
        assert_eq!(holder.queue.pop(), Some(1));
    }

    #[test]
    fn test_clear() {
        let mut queue = PriorityQueue::new();
        queue.push(1);
        queue.push(2);
        assert!(!queue.is_empty());
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);
    }
}
