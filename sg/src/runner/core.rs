//! TaskRunner implementation

use std::sync::Arc;

use lockbox::ScalarBox;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::priority::Priority;
use crate::queue::PriorityQueue;

use super::error::RunnerError;
use super::slot::{Position, Slot, Task, Waiter};
use super::snapshot::{QueueSnapshot, RunnerStats};

/// Internal state protected by the runner lock
///
/// The lock is never held across an `.await`.
#[derive(Debug, Default)]
struct RunnerInner {
    heap: PriorityQueue<Waiter>,
    stats: RunnerStats,
}

type Shared = Arc<ScalarBox<RunnerInner>>;

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Serializes access to one protected resource, highest priority first
///
/// Must be created inside a Tokio runtime: construction spawns the admission
/// and dispatch loops. They stop when the runner's token (a child of the
/// token passed to [`new`](Self::new)) is cancelled, or once the runner is
/// dropped and the queues drain.
pub struct TaskRunner<T> {
    intake: mpsc::UnboundedSender<Waiter>,
    inner: Shared,
    factory: Factory<T>,
    cancel: CancellationToken,
    handles: ScalarBox<Vec<JoinHandle<()>>>,
}

impl<T: Task> TaskRunner<T> {
    /// Create a runner and start its loops
    ///
    /// `factory` builds a fresh task for every granted slot.
    pub fn new(cancel: CancellationToken, factory: impl Fn() -> T + Send + Sync + 'static) -> Self {
        debug!("TaskRunner::new: called");
        let cancel = cancel.child_token();
        let inner: Shared = Arc::new(ScalarBox::new(RunnerInner::default()));
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();

        let admission = tokio::spawn(admission_loop(intake_rx, dispatch_tx, Arc::clone(&inner), cancel.clone()));
        let dispatch = tokio::spawn(dispatch_loop(dispatch_rx, Arc::clone(&inner), cancel.clone()));

        Self {
            intake: intake_tx,
            inner,
            factory: Box::new(factory),
            cancel,
            handles: ScalarBox::new(vec![admission, dispatch]),
        }
    }

    /// Wait for the next slot at `priority`
    ///
    /// Returns a fresh task holding the slot. The wait races both `cancel`
    /// and the runner's own token; if either fires first the request is
    /// withdrawn from the queue and [`RunnerError::Cancelled`] is returned.
    /// Dropping the returned future withdraws it the same way.
    pub async fn request_slot(&self, priority: Priority, cancel: &CancellationToken) -> Result<T, RunnerError> {
        debug!(%priority, "TaskRunner::request_slot: called");
        let (proceed_tx, proceed_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let position = Position::new();

        self.intake
            .send(Waiter::new(priority, proceed_tx, done_rx, position.clone()))
            .map_err(|_| RunnerError::Stopped)?;

        let mut queued = QueuedRequest {
            inner: &self.inner,
            proceed: proceed_rx,
            position,
            pending: true,
        };

        let granted = tokio::select! {
            granted = &mut queued.proceed => granted.is_ok(),
            _ = cancel.cancelled() => {
                debug!(%priority, "TaskRunner::request_slot: caller cancelled");
                return Err(RunnerError::Cancelled);
            }
            _ = self.cancel.cancelled() => {
                debug!(%priority, "TaskRunner::request_slot: runner cancelled");
                return Err(RunnerError::Cancelled);
            }
        };
        queued.pending = false;

        if !granted {
            debug!(%priority, "TaskRunner::request_slot: waiter dropped by runner");
            if self.cancel.is_cancelled() {
                return Err(RunnerError::Cancelled);
            }
            return Err(RunnerError::Stopped);
        }

        debug!(%priority, "TaskRunner::request_slot: granted");
        let mut task = (self.factory)();
        task.attach(Slot::new(priority, done_tx));
        Ok(task)
    }

    /// Pending waiters by priority, read under the lock
    pub fn snapshot(&self) -> QueueSnapshot {
        debug!("TaskRunner::snapshot: called");
        self.inner
            .with(|inner| QueueSnapshot::from_priorities(inner.heap.items().iter().map(|w| w.priority)))
    }

    pub fn stats(&self) -> RunnerStats {
        self.inner.with(|inner| inner.stats)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop both loops and wait for them to exit
    ///
    /// Work already granted is not interrupted. Waiters still queued get
    /// [`RunnerError::Cancelled`].
    pub async fn shutdown(&self) {
        debug!("TaskRunner::shutdown: called");
        self.cancel.cancel();
        let handles = self.handles.with(std::mem::take);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(%e, "TaskRunner::shutdown: loop task failed");
            }
        }
    }
}

/// A caller's side of a queued waiter
///
/// Until the grant arrives, dropping it takes the waiter back out of the heap.
struct QueuedRequest<'a> {
    inner: &'a Shared,
    proceed: oneshot::Receiver<()>,
    position: Position,
    pending: bool,
}

impl Drop for QueuedRequest<'_> {
    fn drop(&mut self) {
        if !self.pending {
            return;
        }
        // Closed first so admission skips the waiter if it has not queued it yet
        self.proceed.close();
        self.inner.with(|inner| {
            if let Some(index) = self.position.get() {
                debug!(index, "QueuedRequest::drop: withdrawing waiter");
                inner.heap.remove(index);
                inner.stats.abandoned += 1;
            }
        });
    }
}

/// Move waiters from the intake queue into the heap
async fn admission_loop(
    mut intake: mpsc::UnboundedReceiver<Waiter>,
    dispatch: mpsc::UnboundedSender<()>,
    inner: Shared,
    cancel: CancellationToken,
) {
    debug!("admission_loop: started");
    loop {
        let waiter = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("admission_loop: cancelled");
                break;
            }
            waiter = intake.recv() => match waiter {
                Some(waiter) => waiter,
                None => {
                    debug!("admission_loop: intake closed");
                    break;
                }
            },
        };

        let queued = inner.with(|inner| {
            if waiter.is_abandoned() {
                debug!(priority = %waiter.priority, "admission_loop: caller left before queuing");
                inner.stats.abandoned += 1;
                return false;
            }
            debug!(priority = %waiter.priority, "admission_loop: queuing waiter");
            inner.heap.push(waiter);
            inner.stats.peak_queue_depth = inner.stats.peak_queue_depth.max(inner.heap.len());
            true
        });

        if queued && dispatch.send(()).is_err() {
            debug!("admission_loop: dispatch loop gone");
            break;
        }
    }
}

/// Grant one waiter per signal and wait for it to finish before the next
async fn dispatch_loop(mut signals: mpsc::UnboundedReceiver<()>, inner: Shared, cancel: CancellationToken) {
    debug!("dispatch_loop: started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("dispatch_loop: cancelled");
                break;
            }
            signal = signals.recv() => {
                if signal.is_none() {
                    debug!("dispatch_loop: signal queue closed");
                    break;
                }
            }
        }

        let Some(Waiter {
            priority, proceed, done, ..
        }) = inner.with(|inner| inner.heap.pop())
        else {
            // Its waiter was withdrawn by the caller
            debug!("dispatch_loop: nothing left to grant for this signal");
            continue;
        };

        if proceed.send(()).is_err() {
            debug!(%priority, "dispatch_loop: waiter abandoned before dispatch");
            inner.with(|inner| inner.stats.abandoned += 1);
            continue;
        }
        inner.with(|inner| inner.stats.granted += 1);
        debug!(%priority, "dispatch_loop: granted, waiting for completion");

        tokio::select! {
            _ = done => {
                debug!(%priority, "dispatch_loop: slot released");
                inner.with(|inner| inner.stats.completed += 1);
            }
            _ = cancel.cancelled() => {
                debug!("dispatch_loop: cancelled while slot held");
                break;
            }
        }
    }
}
