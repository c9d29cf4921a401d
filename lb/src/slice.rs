//! Ordered list container

use crate::RwScalarBox;

/// A `Vec` behind a reader/writer lock
#[derive(Debug)]
pub struct SliceBox<T> {
    inner: RwScalarBox<Vec<T>>,
}

impl<T> Default for SliceBox<T> {
    fn default() -> Self {
        Self {
            inner: RwScalarBox::new(Vec::new()),
        }
    }
}

impl<T> SliceBox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(values: Vec<T>) -> Self {
        Self {
            inner: RwScalarBox::new(values),
        }
    }

    /// Append every element of `values` at the end
    pub fn append(&self, values: impl IntoIterator<Item = T>) {
        self.inner.with(|v| v.extend(values));
    }

    pub fn push(&self, value: T) {
        self.inner.with(|v| v.push(value));
    }

    /// Insert `value` at the front
    pub fn unshift(&self, value: T) {
        self.inner.with(|v| v.insert(0, value));
    }

    /// Remove the element at `index`, shifting the rest left
    ///
    /// Returns `None` when `index` is out of bounds.
    pub fn remove(&self, index: usize) -> Option<T> {
        self.inner.with(|v| (index < v.len()).then(|| v.remove(index)))
    }

    /// Remove every element
    pub fn clear(&self) {
        self.inner.with(Vec::clear);
    }

    pub fn len(&self) -> usize {
        self.inner.read_with(Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read_with(Vec::is_empty)
    }

    /// Visit every element in order under the shared lock
    pub fn each(&self, mut f: impl FnMut(&T)) {
        self.inner.read_with(|v| v.iter().for_each(&mut f));
    }
}

impl<T: Clone> SliceBox<T> {
    /// Copy the elements out so they can be used without the lock
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.get()
    }
}
