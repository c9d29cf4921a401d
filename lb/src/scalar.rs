//! Scalar containers

use std::ops::AddAssign;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A value guarded by a mutex
#[derive(Debug, Default)]
pub struct ScalarBox<T> {
    inner: Mutex<T>,
}

impl<T> ScalarBox<T> {
    /// Wrap a value
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the value
    pub fn set(&self, value: T) {
        *self.lock() = value;
    }

    /// Replace the value, returning the previous one
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.lock(), value)
    }

    /// Run `f` with exclusive access to the value
    ///
    /// The lock is held for the whole closure. Return a `Result` from the
    /// closure to propagate errors out of the critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }

    /// Consume the box and return the value
    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> ScalarBox<T> {
    /// Clone the value out
    pub fn get(&self) -> T {
        self.lock().clone()
    }
}

/// A value guarded by a reader/writer lock
///
/// Many readers may hold the lock at once when no writer does.
#[derive(Debug, Default)]
pub struct RwScalarBox<T> {
    inner: RwLock<T>,
}

impl<T> RwScalarBox<T> {
    /// Wrap a value
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the value
    pub fn set(&self, value: T) {
        *self.write() = value;
    }

    /// Replace the value, returning the previous one
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut *self.write(), value)
    }

    /// Run `f` with exclusive access to the value
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.write())
    }

    /// Run `f` with shared, read-only access to the value
    pub fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.read())
    }

    /// Consume the box and return the value
    pub fn into_inner(self) -> T {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> RwScalarBox<T> {
    /// Clone the value out under the shared lock
    pub fn get(&self) -> T {
        self.read().clone()
    }
}

/// An additive counter behind a reader/writer lock
#[derive(Debug, Default)]
pub struct CounterBox<T> {
    inner: RwScalarBox<T>,
}

impl<T: AddAssign + Copy> CounterBox<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwScalarBox::new(value),
        }
    }

    /// Add `diff` to the counter
    pub fn incr(&self, diff: T) {
        self.inner.with(|v| *v += diff);
    }

    pub fn get(&self) -> T {
        self.inner.read_with(|v| *v)
    }

    pub fn set(&self, value: T) {
        self.inner.set(value);
    }
}
