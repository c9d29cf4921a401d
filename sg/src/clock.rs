//! Injectable time source
//!
//! Everything that waits on time (backoff delays, rate-limit windows) goes
//! through a [`Clock`] so tests can drive time by hand with [`FakeClock`]
//! instead of sleeping for real.

use std::time::Duration;

use async_trait::async_trait;
use lockbox::ScalarBox;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::debug;

/// Source of the current time and of timed waits
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant
    fn now(&self) -> Instant;

    /// Resolve once `duration` has elapsed on this clock
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by Tokio's timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct Sleeper {
    deadline: Instant,
    tx: oneshot::Sender<()>,
}

#[derive(Debug)]
struct FakeState {
    now: Instant,
    sleepers: Vec<Sleeper>,
}

/// Manually driven clock for tests
///
/// Time stands still until [`advance`](FakeClock::advance) is called, which
/// wakes every sleeper whose deadline has been reached.
/// [`block_until`](FakeClock::block_until) lets a test wait for the code under
/// test to reach its sleep before moving time.
#[derive(Debug)]
pub struct FakeClock {
    state: ScalarBox<FakeState>,
    changed: Notify,
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            state: ScalarBox::new(FakeState {
                now: Instant::now(),
                sleepers: Vec::new(),
            }),
            changed: Notify::new(),
        }
    }

    /// Move time forward, waking sleepers that are due
    pub fn advance(&self, duration: Duration) {
        debug!(?duration, "FakeClock::advance: called");
        let due = self.state.with(|s| {
            s.now += duration;
            let now = s.now;
            let (due, pending): (Vec<_>, Vec<_>) = s.sleepers.drain(..).partition(|sl| sl.deadline <= now);
            s.sleepers = pending;
            due
        });
        debug!(woken = due.len(), "FakeClock::advance: waking sleepers");
        for sleeper in due {
            let _ = sleeper.tx.send(());
        }
        self.changed.notify_waiters();
    }

    /// Number of pending sleeps
    pub fn sleepers(&self) -> usize {
        self.state.with(|s| {
            s.sleepers.retain(|sl| !sl.tx.is_closed());
            s.sleepers.len()
        })
    }

    /// Wait until exactly `count` sleeps are pending
    pub async fn block_until(&self, count: usize) {
        loop {
            let notified = self.changed.notified();
            if self.sleepers() == count {
                return;
            }
            notified.await;
        }
    }
}

/// Wakes `block_until` callers when a sleep ends or is abandoned
struct SleepGuard<'a>(&'a Notify);

impl Drop for SleepGuard<'_> {
    fn drop(&mut self) {
        self.0.notify_waiters();
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.state.with(|s| s.now)
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        // Declared before the receiver so it drops after it
        let _guard = SleepGuard(&self.changed);
        let rx = self.state.with(|s| {
            let (tx, rx) = oneshot::channel();
            s.sleepers.push(Sleeper {
                deadline: s.now + duration,
                tx,
            });
            rx
        });
        self.changed.notify_waiters();
        let _ = rx.await;
    }
}
