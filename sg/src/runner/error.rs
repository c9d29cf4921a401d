//! Task runner error types

use thiserror::Error;

/// Why a slot request returned without a slot
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RunnerError {
    /// The caller's token or the runner's token fired while waiting
    #[error("Slot request cancelled")]
    Cancelled,

    /// The runner's background loops are gone
    #[error("Task runner stopped")]
    Stopped,
}
