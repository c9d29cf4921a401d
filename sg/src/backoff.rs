//! Cancellable exponential backoff
//!
//! Delays are whole seconds: 1, 2, 4, ... capped at the configured ceiling
//! (0 = no cap). `reset` drops back to the base delay and may be called from
//! any task, typically after an operation succeeded.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::clock::{Clock, SystemClock};

/// Exponential backoff driver
#[derive(Debug)]
pub struct ExponentialBackoff {
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
    /// Current delay in seconds, 0 after a reset
    current: AtomicU64,
    max: u64,
}

impl ExponentialBackoff {
    /// Backoff on the system clock with a ceiling of `max_secs` seconds
    pub fn new(cancel: CancellationToken, max_secs: u64) -> Self {
        Self::with_clock(cancel, Arc::new(SystemClock), max_secs)
    }

    pub fn with_clock(cancel: CancellationToken, clock: Arc<dyn Clock>, max_secs: u64) -> Self {
        debug!(max_secs, "ExponentialBackoff::with_clock: called");
        Self {
            cancel,
            clock,
            current: AtomicU64::new(0),
            max: max_secs,
        }
    }

    /// Delay the last `wait` used, in seconds
    pub fn current_delay(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    /// Ceiling in seconds, 0 when unbounded
    pub fn max_delay(&self) -> u64 {
        self.max
    }

    fn next_delay(&self, current: u64) -> u64 {
        if current == 0 {
            return 1;
        }
        let doubled = current.saturating_mul(2);
        if self.max > 0 { doubled.min(self.max) } else { doubled }
    }

    /// Advance the delay and sleep for it, or until cancelled
    pub async fn wait(&self) {
        // One atomic step, so concurrent waits and resets never see a stale delay
        let previous = self
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| Some(self.next_delay(current)))
            .unwrap_or_else(|current| current);
        let next = self.next_delay(previous);
        debug!(delay_secs = next, "ExponentialBackoff::wait: sleeping");
        tokio::select! {
            _ = self.clock.sleep(Duration::from_secs(next)) => {}
            _ = self.cancel.cancelled() => {
                debug!("ExponentialBackoff::wait: cancelled");
            }
        }
    }

    /// Return to the base delay
    pub fn reset(&self) {
        debug!("ExponentialBackoff::reset: called");
        self.current.store(0, Ordering::SeqCst);
    }

    /// Run `callback` until it returns `false` or the token is cancelled,
    /// backing off between attempts
    pub async fn loop_forever<F, Fut>(&self, mut callback: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        loop {
            if !callback().await {
                debug!("ExponentialBackoff::loop_forever: callback asked to stop");
                return;
            }
            self.wait().await;
            if self.cancel.is_cancelled() {
                debug!("ExponentialBackoff::loop_forever: cancelled");
                return;
            }
        }
    }
}
