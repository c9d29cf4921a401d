//! LockBox - lock-guarded containers for shared mutable state
//!
//! Every value lives behind a lock and is only reachable through scoped
//! accessors: the closure passed to `with`/`read_with` runs with the lock held
//! and the lock is released on every exit path, including a panic inside the
//! closure. Compound operations such as [`MapBox::take_key`] run inside a
//! single critical section so callers never need check-then-act sequences.
//!
//! # Containers
//!
//! - [`ScalarBox`] - exclusive access to any value
//! - [`RwScalarBox`] - exclusive writes, shared reads
//! - [`MapBox`] - keyed map with atomic take/delete
//! - [`SliceBox`] - ordered list with atomic append/unshift/remove
//! - [`CounterBox`] - additive counter
//!
//! A panic inside a closure poisons the std lock. The containers recover the
//! guard from the poison error instead of propagating it, so one failed
//! caller does not wedge every other caller.

mod map;
mod scalar;
mod slice;

pub use map::MapBox;
pub use scalar::{CounterBox, RwScalarBox, ScalarBox};
pub use slice::SliceBox;
