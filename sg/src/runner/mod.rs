//! Priority-ordered, single-flight task admission
//!
//! Callers ask for "the next execution slot at priority P". Two background
//! tasks cooperate through two unbounded queues and one locked heap:
//!
//! - the admission loop moves waiters from the intake queue into the heap and
//!   signals the dispatch loop,
//! - the dispatch loop pops the highest-priority waiter per signal, lets it
//!   proceed, then waits for that waiter's slot to be released before it
//!   looks at the next signal.
//!
//! At most one granted task runs at a time. Waiters present in the heap at a
//! dispatch decision are served highest priority first; equal priorities are
//! unordered.

mod core;
mod error;
mod slot;
mod snapshot;

pub use self::core::TaskRunner;
pub use error::RunnerError;
pub use slot::{Slot, Task};
pub use snapshot::{QueueSnapshot, RunnerStats};
