//! Waiter descriptors, slots and the task contract

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::oneshot;
use tracing::debug;

use crate::priority::Priority;
use crate::queue::HeapItem;

/// Work handed out by a [`TaskRunner`](super::TaskRunner)
///
/// The runner builds a fresh task per granted slot and attaches the slot
/// before returning it. The task must release the slot exactly once when its
/// work is over; holding it forever stalls every other waiter. Keeping the
/// [`Slot`] as a field is enough: dropping the task drops the slot, which
/// releases it.
pub trait Task: Send + 'static {
    /// Take ownership of the slot granted for this task
    fn attach(&mut self, slot: Slot);
}

/// The right to execute, granted to one waiter at a time
///
/// Released by [`Slot::done`] or on drop, whichever comes first.
#[derive(Debug)]
pub struct Slot {
    priority: Priority,
    done: Option<oneshot::Sender<()>>,
}

impl Slot {
    pub(crate) fn new(priority: Priority, done: oneshot::Sender<()>) -> Self {
        Self {
            priority,
            done: Some(done),
        }
    }

    /// Priority this slot was requested at
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Release the slot so the next waiter can be dispatched
    pub fn done(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(tx) = self.done.take() {
            debug!(priority = %self.priority, "Slot::release: signalling completion");
            let _ = tx.send(());
        }
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.release();
    }
}

/// Heap position of a waiter, shared with the caller waiting on it
///
/// Written only by the heap, read by the caller when it gives up, both under
/// the runner lock.
#[derive(Debug, Clone)]
pub(crate) struct Position(Arc<AtomicUsize>);

impl Position {
    const NOT_QUEUED: usize = usize::MAX;

    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicUsize::new(Self::NOT_QUEUED)))
    }

    pub(crate) fn get(&self) -> Option<usize> {
        match self.0.load(Ordering::SeqCst) {
            Self::NOT_QUEUED => None,
            index => Some(index),
        }
    }

    fn set(&self, index: Option<usize>) {
        self.0.store(index.unwrap_or(Self::NOT_QUEUED), Ordering::SeqCst);
    }
}

/// One pending slot request, as stored in the heap
#[derive(Debug)]
pub(crate) struct Waiter {
    pub(crate) priority: Priority,
    /// Fired by the dispatcher when this waiter may proceed
    pub(crate) proceed: oneshot::Sender<()>,
    /// Resolves when the granted slot is released (or abandoned)
    pub(crate) done: oneshot::Receiver<()>,
    position: Position,
}

impl Waiter {
    pub(crate) fn new(
        priority: Priority,
        proceed: oneshot::Sender<()>,
        done: oneshot::Receiver<()>,
        position: Position,
    ) -> Self {
        Self {
            priority,
            proceed,
            done,
            position,
        }
    }

    /// The caller stopped waiting
    pub(crate) fn is_abandoned(&self) -> bool {
        self.proceed.is_closed()
    }
}

impl HeapItem for Waiter {
    fn priority(&self) -> i64 {
        self.priority.value()
    }

    fn index(&self) -> Option<usize> {
        self.position.get()
    }

    fn set_index(&mut self, index: Option<usize>) {
        self.position.set(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_done_signals_once() {
        let (tx, rx) = oneshot::channel();
        let slot = Slot::new(Priority::Important, tx);
        assert_eq!(slot.priority(), Priority::Important);
        slot.done();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_slot_drop_releases() {
        let (tx, rx) = oneshot::channel();
        {
            let _slot = Slot::new(Priority::Low, tx);
        }
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_slot_released_on_error_path() {
        fn failing_work(slot: Slot) -> Result<(), String> {
            let _slot = slot;
            Err("remote said no".to_string())
        }

        let (tx, rx) = oneshot::channel();
        assert!(failing_work(Slot::new(Priority::Normal, tx)).is_err());
        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_waiter_heap_priority() {
        let (proceed, _proceed_rx) = oneshot::channel();
        let (_done_tx, done) = oneshot::channel();
        let waiter = Waiter::new(Priority::Critical, proceed, done, Position::new());
        assert_eq!(HeapItem::priority(&waiter), 4);
        assert_eq!(waiter.index(), None);
    }

    #[test]
    fn test_position_tracks_heap_moves() {
        use crate::queue::PriorityQueue;

        let mut heap = PriorityQueue::new();
        let mut positions = Vec::new();
        for priority in [Priority::Low, Priority::Normal, Priority::Critical] {
            let (proceed, _) = oneshot::channel();
            let (_, done) = oneshot::channel();
            let position = Position::new();
            positions.push(position.clone());
            heap.push(Waiter::new(priority, proceed, done, position));
        }

        // Critical sifted to the root, the caller sees it
        assert_eq!(positions[2].get(), Some(0));
        let removed = heap.remove(positions[0].get().unwrap()).unwrap();
        assert_eq!(removed.priority, Priority::Low);
        assert_eq!(positions[0].get(), None);
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_waiter_abandoned_when_receiver_closed() {
        let (proceed, mut proceed_rx) = oneshot::channel();
        let (_done_tx, done) = oneshot::channel();
        let waiter = Waiter::new(Priority::Low, proceed, done, Position::new());
        assert!(!waiter.is_abandoned());
        proceed_rx.close();
        assert!(waiter.is_abandoned());
    }
}
