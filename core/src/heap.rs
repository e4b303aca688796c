//! A min-heap of work items keyed by float priority.
//!
//! Entries are never removed in place: when residency changes, stale
//! entries simply stay in the heap and the caller filters them out after
//! `pop_min` by consulting the authoritative set. Duplicate pushes of the
//! same item are allowed for the same reason.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct HeapEntry<T> {
    priority: f32,
    seq: u64,
    item: T,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    // Reversed so the std max-heap pops the smallest priority first; the
    // sequence number breaks ties in insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct WorkHeap<T> {
    heap: BinaryHeap<HeapEntry<T>>,
    next_seq: u64,
}

impl<T> Default for WorkHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkHeap<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn push(&mut self, priority: f32, item: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(HeapEntry {
            priority,
            seq,
            item,
        });
    }

    /// Pops the entry with the smallest priority. May return items that
    /// have since gone stale; the caller filters.
    pub fn pop_min(&mut self) -> Option<(f32, T)> {
        self.heap.pop().map(|e| (e.priority, e.item))
    }

    pub fn peek_priority(&self) -> Option<f32> {
        self.heap.peek().map(|e| e.priority)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Takes all entries out, e.g. to re-score them after the viewer moved.
    pub fn drain_snapshot(&mut self) -> Vec<(f32, T)> {
        self.heap.drain().map(|e| (e.priority, e.item)).collect()
    }

    /// Rebuilds the heap with new priorities. Entries for which `score`
    /// returns `None` are dropped (stale).
    pub fn rescore(&mut self, mut score: impl FnMut(&T) -> Option<f32>) {
        let entries = self.drain_snapshot();
        for (_, item) in entries {
            if let Some(priority) = score(&item) {
                self.push(priority, item);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_min_is_non_decreasing() {
        let mut heap = WorkHeap::new();
        for (p, v) in [(5.0, "e"), (1.0, "a"), (3.0, "c"), (2.0, "b"), (3.0, "d")] {
            heap.push(p, v);
        }
        let mut last = f32::MIN;
        while let Some((p, _)) = heap.pop_min() {
            assert!(p >= last);
            last = p;
        }
    }

    #[test]
    fn equal_priorities_pop_in_insertion_order() {
        let mut heap = WorkHeap::new();
        heap.push(7.0, "first");
        heap.push(7.0, "second");
        heap.push(7.0, "third");
        assert_eq!(heap.pop_min().unwrap().1, "first");
        assert_eq!(heap.pop_min().unwrap().1, "second");
        assert_eq!(heap.pop_min().unwrap().1, "third");
    }

    #[test]
    fn duplicates_are_tolerated() {
        let mut heap = WorkHeap::new();
        heap.push(1.0, 42u32);
        heap.push(2.0, 42u32);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.pop_min(), Some((1.0, 42)));
        assert_eq!(heap.pop_min(), Some((2.0, 42)));
    }

    #[test]
    fn rescore_drops_stale_entries() {
        let mut heap = WorkHeap::new();
        heap.push(1.0, 1u32);
        heap.push(2.0, 2u32);
        heap.push(3.0, 3u32);
        heap.rescore(|&item| if item == 2 { None } else { Some(10.0 - item as f32) });
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.pop_min(), Some((7.0, 3)));
        assert_eq!(heap.pop_min(), Some((9.0, 1)));
    }
}
