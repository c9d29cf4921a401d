//! Integration tests for Slotgate
//!
//! Sessions and clients end to end, with in-memory transports standing in
//! for the remote side.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use lockbox::SliceBox;
use slotgate::{
    ExponentialBackoff, FakeClock, HttpError, Priority, RateLimitedClient, RunnerError, Session, Transport,
};
use tokio_util::sync::CancellationToken;

/// Remote stand-in: answers with the request path and logs the order of calls
#[derive(Debug, Default)]
struct Remote {
    calls: SliceBox<String>,
    in_flight: AtomicUsize,
    overlap: AtomicUsize,
}

#[async_trait]
impl Transport for Remote {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap.fetch_add(1, Ordering::SeqCst);
        }
        let path = request.url().path().to_string();
        self.calls.push(path.clone());
        tokio::time::sleep(Duration::from_millis(2)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let response = http::Response::builder()
            .status(200)
            .header("content-type", "text/plain")
            .body(path)
            .unwrap();
        Ok(reqwest::Response::from(response))
    }
}

/// Fails the first `failures` calls with a transport error, then succeeds
#[derive(Debug)]
struct Flaky {
    failures: usize,
    seen: AtomicUsize,
}

#[async_trait]
impl Transport for Flaky {
    async fn round_trip(&self, _request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        if self.seen.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(reqwest::Client::new().get("::bad").build().unwrap_err());
        }
        Ok(reqwest::Response::from(http::Response::builder().status(204).body("").unwrap()))
    }
}

fn session_over(transport: Arc<dyn Transport>) -> (Arc<Session>, CancellationToken) {
    let cancel = CancellationToken::new();
    let client = RateLimitedClient::builder()
        .user_agent("integration/1.0")
        .transport(transport)
        .build()
        .expect("client");
    (Arc::new(Session::new(cancel.clone(), client)), cancel)
}

#[tokio::test]
async fn test_queued_callers_served_by_priority() {
    let remote = Arc::new(Remote::default());
    let (session, cancel) = session_over(remote.clone());

    let blocker = session
        .with_priority(Priority::Normal, &cancel)
        .await
        .unwrap()
        .begin("blocker");

    let mut handles = Vec::new();
    for (name, priority) in [
        ("low", Priority::Low),
        ("critical", Priority::Critical),
        ("normal", Priority::Normal),
        ("important", Priority::Important),
    ] {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let task = session.with_priority(priority, &cancel).await.unwrap();
            task.get(format!("http://remote.test/{}", name).as_str()).await.unwrap();
        }));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while session.snapshot().total < 4 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("callers never queued");
    let snapshot = session.snapshot();
    assert_eq!(snapshot.count(Priority::Low), 1);
    assert_eq!(snapshot.count(Priority::Critical), 1);

    blocker.done();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(remote.calls.to_vec(), vec!["/critical", "/important", "/normal", "/low"]);
    assert_eq!(remote.overlap.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_many_callers_never_overlap() {
    let remote = Arc::new(Remote::default());
    let (session, cancel) = session_over(remote.clone());

    let calls = (0..30).map(|n| {
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move {
            let priority = Priority::ALL[n % Priority::ALL.len()];
            let tx = session.with_priority(priority, &cancel).await.unwrap().begin("pair");
            tx.get("http://remote.test/one").await.unwrap();
            tx.get("http://remote.test/two").await.unwrap();
        }
    });
    futures::future::join_all(calls).await;

    assert_eq!(remote.calls.len(), 60);
    assert_eq!(remote.overlap.load(Ordering::SeqCst), 0);
    // Each transaction's two calls stay adjacent
    let calls = remote.calls.to_vec();
    for pair in calls.chunks(2) {
        assert_eq!(pair, ["/one", "/two"]);
    }
}

#[tokio::test]
async fn test_traffic_counters_through_session() {
    let remote = Arc::new(Remote::default());
    let (session, cancel) = session_over(remote);

    let task = session.with_priority(Priority::Normal, &cancel).await.unwrap();
    let response = task.post_form("http://remote.test/login", &[("user", "ab")]).await.unwrap();
    assert_eq!(response.text(), "/login");
    assert_eq!(response.headers()["content-type"], "text/plain");

    // "user=ab"
    assert_eq!(session.client().bytes_uploaded(), 7);
    assert_eq!(session.client().bytes_downloaded(), 6);
}

#[tokio::test]
async fn test_retry_with_backoff_until_success() {
    let flaky = Arc::new(Flaky {
        failures: 2,
        seen: AtomicUsize::new(0),
    });
    let (session, cancel) = session_over(flaky.clone());
    let clock = Arc::new(FakeClock::new());
    let backoff = Arc::new(ExponentialBackoff::with_clock(cancel.clone(), clock.clone(), 60));

    let worker = tokio::spawn({
        let session = Arc::clone(&session);
        let backoff = Arc::clone(&backoff);
        let cancel = cancel.clone();
        async move {
            let mut failures = 0;
            loop {
                let task = session.with_priority(Priority::Important, &cancel).await.unwrap();
                match task.get("http://remote.test/").await {
                    Ok(response) => return (response.status().as_u16(), failures),
                    Err(HttpError::Transport(_)) => {
                        failures += 1;
                        backoff.wait().await;
                    }
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
        }
    });

    clock.block_until(1).await;
    clock.advance(Duration::from_secs(1));
    clock.block_until(1).await;
    clock.advance(Duration::from_secs(2));

    let (status, failures) = worker.await.unwrap();
    assert_eq!(status, 204);
    assert_eq!(failures, 2);
    assert_eq!(flaky.seen.load(Ordering::SeqCst), 3);
    // Backoff sleeps happen outside the slot, so nothing was held meanwhile
    assert_eq!(session.locked_by(), None);
}

#[tokio::test]
async fn test_cancel_releases_waiting_callers() {
    let (session, cancel) = session_over(Arc::new(Remote::default()));
    let held = session.with_priority(Priority::Low, &cancel).await.unwrap();

    let waiting = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move { session.with_priority(Priority::Critical, &cancel).await.map(|_| ()) }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), waiting).await.unwrap().unwrap();
    assert_eq!(result, Err(RunnerError::Cancelled));
    drop(held);
}

#[tokio::test]
async fn test_rate_ceiling_paces_session_traffic() {
    let remote = Arc::new(Remote::default());
    let clock = Arc::new(FakeClock::new());
    let cancel = CancellationToken::new();
    let client = RateLimitedClient::builder()
        .max_rps(2)
        .clock(clock.clone())
        .transport(remote.clone())
        .build()
        .unwrap();
    let session = Arc::new(Session::new(cancel.clone(), client));
    clock.block_until(1).await;

    let worker = tokio::spawn({
        let session = Arc::clone(&session);
        let cancel = cancel.clone();
        async move {
            for _ in 0..3 {
                let task = session.with_priority(Priority::Normal, &cancel).await.unwrap();
                task.get("http://remote.test/tick").await.unwrap();
            }
        }
    });

    // Third request waits for the window to close
    clock.block_until(2).await;
    assert_eq!(remote.calls.len(), 2);
    assert_eq!(session.locked_by().as_deref(), Some("Get"));

    clock.advance(Duration::from_secs(1));
    worker.await.unwrap();
    assert_eq!(remote.calls.len(), 3);
}
