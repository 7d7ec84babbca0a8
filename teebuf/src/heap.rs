//! Reader offset tracking.
//!
//! The slowest live reader decides how much of the buffer may be evicted.
//! [`ReaderHeap`] is a binary min-heap over reader read offsets that also
//! remembers where each reader sits in the heap, so a reader can be moved
//! or removed in O(log n) when it advances or closes.

use std::collections::HashMap;

/// Identifies a registered reader.
pub(crate) type ReaderId = u64;

#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: u64,
    index: usize,
}

/// Indexed binary min-heap of reader offsets.
///
/// Readers with equal offsets are kept in no particular order.
#[derive(Debug, Default)]
pub(crate) struct ReaderHeap {
    heap: Vec<ReaderId>,
    entries: HashMap<ReaderId, Entry>,
}

impl ReaderHeap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Returns the smallest offset, if any reader is registered.
    pub(crate) fn peek(&self) -> Option<u64> {
        self.heap.first().map(|id| self.entries[id].offset)
    }

    pub(crate) fn offset(&self, id: ReaderId) -> Option<u64> {
        self.entries.get(&id).map(|e| e.offset)
    }

    /// Registers `id` at `offset`. Re-pushing an existing id moves it.
    pub(crate) fn push(&mut self, id: ReaderId, offset: u64) {
        if self.set_offset(id, offset) {
            return;
        }
        let index = self.heap.len();
        self.heap.push(id);
        self.entries.insert(id, Entry { offset, index });
        self.sift_up(index);
    }

    /// Removes `id` and returns its last offset.
    pub(crate) fn remove(&mut self, id: ReaderId) -> Option<u64> {
        let entry = self.entries.remove(&id)?;
        let last = self.heap.len() - 1;
        if entry.index != last {
            self.heap.swap(entry.index, last);
            let moved = self.heap[entry.index];
            self.index_mut(moved, entry.index);
        }
        self.heap.pop();
        if entry.index < self.heap.len() {
            self.fix(entry.index);
        }
        Some(entry.offset)
    }

    /// Moves `id` to `offset`. Returns false if `id` is not registered.
    pub(crate) fn set_offset(&mut self, id: ReaderId, offset: u64) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.offset = offset;
        let index = entry.index;
        self.fix(index);
        true
    }

    fn key(&self, index: usize) -> u64 {
        self.entries[&self.heap[index]].offset
    }

    fn index_mut(&mut self, id: ReaderId, index: usize) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.index = index;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        let (ida, idb) = (self.heap[a], self.heap[b]);
        self.index_mut(ida, a);
        self.index_mut(idb, b);
    }

    fn fix(&mut self, index: usize) {
        if !self.sift_down(index) {
            self.sift_up(index);
        }
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.key(parent) <= self.key(index) {
                break;
            }
            self.swap(parent, index);
            index = parent;
        }
    }

    // Returns true if the element moved.
    fn sift_down(&mut self, start: usize) -> bool {
        let n = self.heap.len();
        let mut index = start;
        loop {
            let left = 2 * index + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.key(right) < self.key(left) {
                child = right;
            }
            if self.key(index) <= self.key(child) {
                break;
            }
            self.swap(index, child);
            index = child;
        }
        index > start
    }
}
