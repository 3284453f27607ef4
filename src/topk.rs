/// Bounded Top-K Selection
///
/// Keeps the K greatest items seen so far in a min-heap of size K, so
/// memory stays O(K) and insertion O(log K) however many candidates pass
/// through. Only the survivors are sorted at the end.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

#[derive(Debug)]
pub struct TopK<T: Ord> {
    capacity: usize,
    // Reverse turns the max-heap into a min-heap: peek() is the weakest survivor
    heap: BinaryHeap<Reverse<T>>,
}

impl<T: Ord> TopK<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            heap: BinaryHeap::with_capacity(capacity.saturating_add(1)),
        }
    }

    /// Offer an item. When full, it replaces the current minimum only if
    /// strictly greater; otherwise it is discarded.
    pub fn push(&mut self, item: T) {
        if self.capacity == 0 {
            return;
        }

        if self.heap.len() < self.capacity {
            self.heap.push(Reverse(item));
            return;
        }

        if let Some(mut weakest) = self.heap.peek_mut() {
            if item > weakest.0 {
                *weakest = Reverse(item);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Survivors, greatest first
    pub fn into_sorted_vec(self) -> Vec<T> {
        // ascending order of Reverse<T> is descending order of T
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|Reverse(item)| item)
            .collect()
    }
}

/// A wallet competing for a place in the ranking.
///
/// Ordered by overlap count; among equal counts the lexicographically
/// smaller address ranks higher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub address: &'a str,
    pub count: usize,
}

impl Ord for Candidate<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.count
            .cmp(&other.count)
            .then_with(|| other.address.cmp(self.address))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
