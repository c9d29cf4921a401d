//! Read-only views of runner state

use serde::Serialize;

use crate::priority::Priority;

/// Pending waiters by priority bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub low: usize,
    pub normal: usize,
    pub important: usize,
    pub critical: usize,
    pub total: usize,
}

impl QueueSnapshot {
    pub(crate) fn from_priorities(priorities: impl IntoIterator<Item = Priority>) -> Self {
        let mut out = Self::default();
        for priority in priorities {
            out.total += 1;
            match priority {
                Priority::Low => out.low += 1,
                Priority::Normal => out.normal += 1,
                Priority::Important => out.important += 1,
                Priority::Critical => out.critical += 1,
            }
        }
        out
    }

    /// Pending count for one priority
    pub fn count(&self, priority: Priority) -> usize {
        match priority {
            Priority::Low => self.low,
            Priority::Normal => self.normal,
            Priority::Important => self.important,
            Priority::Critical => self.critical,
        }
    }
}

/// Running totals for a runner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunnerStats {
    /// Waiters that were let through
    pub granted: u64,
    /// Granted slots that have been released
    pub completed: u64,
    /// Waiters whose caller gave up before dispatch
    pub abandoned: u64,
    pub peak_queue_depth: usize,
}
