//! Slotgate - prioritized, rate-limited access to one remote session
//!
//! Many independent features of an automation client share one remote
//! session. Slotgate makes sure that only one of them touches the session at
//! a time, that more important work goes first, and that outbound traffic
//! stays under a requests-per-second ceiling.
//!
//! # Modules
//!
//! - [`queue`] - Indexed max-heap keyed by integer priority
//! - [`runner`] - Single-flight task runner granting slots by priority
//! - [`http`] - Rate-limited HTTP client with traffic counters
//! - [`backoff`] - Cancellable exponential backoff
//! - [`clock`] - Injectable time source with a fake for tests
//! - [`session`] - Runner and client bundled per remote session
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod backoff;
pub mod cli;
pub mod clock;
pub mod config;
pub mod http;
pub mod priority;
pub mod queue;
pub mod runner;
pub mod session;

pub use backoff::ExponentialBackoff;
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{BackoffConfig, ClientConfig, Config};
pub use http::{HttpError, RateLimitedClient, Response, Transport};
pub use priority::Priority;
pub use queue::{HeapItem, PriorityQueue};
pub use runner::{QueueSnapshot, RunnerError, RunnerStats, Slot, Task, TaskRunner};
pub use session::{Session, SessionTask, StateCallback, Transaction};
