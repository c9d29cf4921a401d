//! Array-backed binary max-heap keyed on priority
//!
//! Items carry their own heap position so they can be removed or re-sifted
//! without a linear search. The heap has no locking of its own; the owner
//! serializes access. Items with equal priority come out in whatever order
//! the sift mechanics leave them, not in insertion order.

/// An element that can live in a [`PriorityQueue`]
pub trait HeapItem {
    /// Ordering key, higher pops first
    fn priority(&self) -> i64;

    /// Current position in the heap, `None` when not queued
    fn index(&self) -> Option<usize>;

    /// Called by the heap whenever the item moves
    fn set_index(&mut self, index: Option<usize>);
}

/// Max-heap of [`HeapItem`]s
#[derive(Debug)]
pub struct PriorityQueue<T> {
    items: Vec<T>,
}

impl<T> Default for PriorityQueue<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: HeapItem> PriorityQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in heap order (not sorted)
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Highest-priority item without removing it
    pub fn peek(&self) -> Option<&T> {
        self.items.first()
    }

    /// Insert an item, O(log n)
    pub fn push(&mut self, mut item: T) {
        let n = self.items.len();
        item.set_index(Some(n));
        self.items.push(item);
        self.up(n);
    }

    /// Remove and return the highest-priority item, O(log n)
    pub fn pop(&mut self) -> Option<T> {
        let n = self.items.len().checked_sub(1)?;
        self.swap(0, n);
        self.down(0, n);
        self.take_last()
    }

    /// Remove the item at heap position `index`, O(log n)
    pub fn remove(&mut self, index: usize) -> Option<T> {
        if index >= self.items.len() {
            return None;
        }
        let n = self.items.len() - 1;
        if n != index {
            self.swap(index, n);
            if !self.down(index, n) {
                self.up(index);
            }
        }
        self.take_last()
    }

    /// Re-establish ordering after the item at `index` changed priority
    pub fn fix(&mut self, index: usize) {
        if index >= self.items.len() {
            return;
        }
        if !self.down(index, self.items.len()) {
            self.up(index);
        }
    }

    /// Mutable access to the item at `index`; call [`fix`](Self::fix) after changing its priority
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)
    }

    fn take_last(&mut self) -> Option<T> {
        let mut item = self.items.pop()?;
        item.set_index(None);
        Some(item)
    }

    fn less(&self, i: usize, j: usize) -> bool {
        // Max-heap: "less" means "pops earlier"
        self.items[i].priority() > self.items[j].priority()
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.items.swap(i, j);
        self.items[i].set_index(Some(i));
        self.items[j].set_index(Some(j));
    }

    fn up(&mut self, mut j: usize) {
        while j > 0 {
            let parent = (j - 1) / 2;
            if !self.less(j, parent) {
                break;
            }
            self.swap(parent, j);
            j = parent;
        }
    }

    /// Sift `start` down within the first `n` items, reporting whether it moved
    fn down(&mut self, start: usize, n: usize) -> bool {
        let mut i = start;
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut child = left;
            let right = left + 1;
            if right < n && self.less(right, left) {
                child = right;
            }
            if !self.less(child, i) {
                break;
            }
            self.swap(i, child);
            i = child;
        }
        i > start
    }
}
