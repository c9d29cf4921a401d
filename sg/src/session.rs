//! Prioritized access to one remote session
//!
//! A [`Session`] pairs a [`TaskRunner`] with a shared [`RateLimitedClient`].
//! Callers ask for a [`SessionTask`] at some priority, then either run a
//! single request with it or open a [`Transaction`] to hold the session for
//! several requests in a row. The session records who holds it and tells
//! registered observers whenever it is locked or unlocked.

use std::future::Future;
use std::sync::Arc;

use lockbox::{ScalarBox, SliceBox};
use reqwest::IntoUrl;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::http::{HttpError, RateLimitedClient, Response};
use crate::priority::Priority;
use crate::runner::{QueueSnapshot, RunnerError, RunnerStats, Slot, Task, TaskRunner};

/// Name used when a transaction is opened without one
pub const DEFAULT_TX_NAME: &str = "Tx";

/// Observer called with `(locked, actor)` on every lock and unlock
pub type StateCallback = Arc<dyn Fn(bool, &str) + Send + Sync>;

/// Who holds the session, and who wants to know
#[derive(Default)]
struct LockState {
    holder: ScalarBox<Option<String>>,
    observers: SliceBox<StateCallback>,
}

impl std::fmt::Debug for LockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockState")
            .field("holder", &self.holder.get())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl LockState {
    fn lock(&self, actor: &str) {
        if let Some(previous) = self.holder.replace(Some(actor.to_string())) {
            info!(%previous, %actor, "LockState::lock: previous holder never cleared");
        }
        self.notify(true, actor);
    }

    fn unlock(&self, actor: &str) {
        self.holder.set(None);
        self.notify(false, actor);
    }

    fn notify(&self, locked: bool, actor: &str) {
        // Called outside the list lock so an observer may register another
        for observer in self.observers.to_vec() {
            observer(locked, actor);
        }
    }
}

/// One remote session guarded by a priority runner
pub struct Session {
    runner: TaskRunner<SessionTask>,
    client: RateLimitedClient,
    state: Arc<LockState>,
}

impl Session {
    /// Must be called inside a Tokio runtime
    pub fn new(cancel: CancellationToken, client: RateLimitedClient) -> Self {
        debug!("Session::new: called");
        let state = Arc::new(LockState::default());
        let runner = TaskRunner::new(cancel, {
            let client = client.clone();
            let state = Arc::clone(&state);
            move || SessionTask::new(client.clone(), Arc::clone(&state))
        });
        Self { runner, client, state }
    }

    /// Wait for the session at `priority`
    pub async fn with_priority(&self, priority: Priority, cancel: &CancellationToken) -> Result<SessionTask, RunnerError> {
        debug!(%priority, "Session::with_priority: called");
        self.runner.request_slot(priority, cancel).await
    }

    /// Register an observer for lock and unlock events
    ///
    /// Observers run synchronously on the task that locks or unlocks, so they
    /// should return quickly.
    pub fn on_state_change(&self, observer: impl Fn(bool, &str) + Send + Sync + 'static) {
        debug!("Session::on_state_change: called");
        self.state.observers.push(Arc::new(observer));
    }

    /// Whether a transaction currently holds the session
    pub fn is_locked(&self) -> bool {
        self.state.holder.with(|holder| holder.is_some())
    }

    /// Name of the transaction currently holding the session
    pub fn locked_by(&self) -> Option<String> {
        self.state.holder.get()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.runner.snapshot()
    }

    pub fn stats(&self) -> RunnerStats {
        self.runner.stats()
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    /// Stop the runner and release every queued caller
    pub async fn shutdown(&self) {
        debug!("Session::shutdown: called");
        self.runner.shutdown().await;
    }
}

/// A granted turn on the session
///
/// Dropping it unused gives the turn back.
#[derive(Debug)]
pub struct SessionTask {
    client: RateLimitedClient,
    state: Arc<LockState>,
    initiator: Option<String>,
    slot: Option<Slot>,
}

impl Task for SessionTask {
    fn attach(&mut self, slot: Slot) {
        self.slot = Some(slot);
    }
}

impl SessionTask {
    fn new(client: RateLimitedClient, state: Arc<LockState>) -> Self {
        Self {
            client,
            state,
            initiator: None,
            slot: None,
        }
    }

    /// Label prefixed to transaction names, e.g. the feature that asked
    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(initiator.into());
        self
    }

    /// Priority the turn was granted at
    pub fn priority(&self) -> Option<Priority> {
        self.slot.as_ref().map(Slot::priority)
    }

    /// Hold the session for several requests
    pub fn begin(self, name: &str) -> Transaction {
        let name = if name.is_empty() { DEFAULT_TX_NAME } else { name };
        let name = match &self.initiator {
            Some(initiator) => format!("{}:{}", initiator, name),
            None => name.to_string(),
        };
        debug!(%name, "SessionTask::begin: called");
        self.state.lock(&name);
        Transaction {
            client: self.client,
            state: self.state,
            name,
            slot: self.slot,
        }
    }

    /// Run `work` inside a transaction named `name`
    ///
    /// The session is released however `work` ends, including when this
    /// future is dropped before it completes.
    pub async fn tx<F, Fut, R>(self, name: &str, work: F) -> R
    where
        F: FnOnce(RateLimitedClient) -> Fut,
        Fut: Future<Output = R>,
    {
        let tx = self.begin(name);
        let result = work(tx.client.clone()).await;
        tx.done();
        result
    }

    /// Single GET, then release the session
    pub async fn get(self, url: impl IntoUrl) -> Result<Response, HttpError> {
        let tx = self.begin("Get");
        let result = tx.get(url).await;
        tx.done();
        result
    }

    /// Single form POST, then release the session
    pub async fn post_form<T: Serialize + ?Sized>(self, url: impl IntoUrl, form: &T) -> Result<Response, HttpError> {
        let tx = self.begin("PostForm");
        let result = tx.post_form(url, form).await;
        tx.done();
        result
    }
}

/// Exclusive use of the session until [`done`](Self::done) or drop
#[derive(Debug)]
pub struct Transaction {
    client: RateLimitedClient,
    state: Arc<LockState>,
    name: String,
    slot: Option<Slot>,
}

impl Transaction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    pub async fn get(&self, url: impl IntoUrl) -> Result<Response, HttpError> {
        self.client.get(url).await
    }

    pub async fn post(
        &self,
        url: impl IntoUrl,
        content_type: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<Response, HttpError> {
        self.client.post(url, content_type, body).await
    }

    pub async fn post_form<T: Serialize + ?Sized>(&self, url: impl IntoUrl, form: &T) -> Result<Response, HttpError> {
        self.client.post_form(url, form).await
    }

    pub async fn execute(&self, request: reqwest::Request) -> Result<Response, HttpError> {
        self.client.execute(request).await
    }

    /// Release the session
    pub fn done(self) {}
}

impl Drop for Transaction {
    fn drop(&mut self) {
        debug!(name = %self.name, "Transaction::drop: releasing session");
        self.state.unlock(&self.name);
        // Unlocked before the next waiter can run
        drop(self.slot.take());
    }
}
