//! RateLimitedClient implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use lockbox::RwScalarBox;
use reqwest::IntoUrl;
use reqwest::header::{CONTENT_TYPE, HeaderValue, USER_AGENT};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, trace};

use super::{HttpError, ReqwestTransport, Response, Transport};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;

/// Length of one rate accounting window
pub const WINDOW: Duration = Duration::from_secs(1);

/// User agent used when none is configured
pub const DEFAULT_USER_AGENT: &str = concat!("slotgate/", env!("CARGO_PKG_VERSION"));

/// Per-window and cumulative traffic counters
#[derive(Debug)]
struct Traffic {
    /// Requests started in the current window
    window_count: AtomicU32,
    /// Requests seen in the last complete window
    rps: AtomicU32,
    /// Ceiling per window, 0 = unlimited
    max_rps: AtomicU32,
    /// End of the current window, as nanos past `epoch`
    window_end: AtomicU64,
    bytes_downloaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    epoch: Instant,
}

impl Traffic {
    fn new(epoch: Instant, max_rps: u32) -> Self {
        Self {
            window_count: AtomicU32::new(0),
            rps: AtomicU32::new(0),
            max_rps: AtomicU32::new(max_rps),
            window_end: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            epoch,
        }
    }

    /// Close the current window: publish its count and start the next one
    fn roll(&self, now: Instant) -> u32 {
        let previous = self.window_count.swap(0, Ordering::SeqCst);
        self.rps.store(previous, Ordering::SeqCst);
        let end = (now + WINDOW).saturating_duration_since(self.epoch);
        self.window_end.store(end.as_nanos() as u64, Ordering::SeqCst);
        previous
    }

    fn window_end(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.window_end.load(Ordering::SeqCst))
    }
}

struct Shared {
    /// As configured, for display
    user_agent: String,
    /// Same value, ready to attach to requests
    user_agent_header: HeaderValue,
    /// Request builder; also backs the default transport
    http: reqwest::Client,
    transport: RwScalarBox<Arc<dyn Transport>>,
    traffic: Arc<Traffic>,
    clock: Arc<dyn Clock>,
    /// Stops the window ticker when the last client handle goes away
    _ticker: DropGuard,
}

/// HTTP client that throttles requests per second and counts traffic
///
/// Clones share counters, throttle and transport. Each call:
///
/// 1. counts itself in the current one-second window and, when a ceiling is
///    set and already reached, sleeps until the window closes,
/// 2. sets the configured `User-Agent`,
/// 3. runs on a transport snapshot taken once for the whole request,
/// 4. reads the body into memory and adds its size to the downloaded bytes,
///    and the request body size to the uploaded bytes.
///
/// The window is a hard wall reset by a background tick, not a sliding
/// window, so a burst straddling a boundary can reach about twice the
/// ceiling. Transport errors are returned as-is and never retried here.
#[derive(Clone)]
pub struct RateLimitedClient {
    shared: Arc<Shared>,
    /// Transport override for this handle only
    pinned: Option<Arc<dyn Transport>>,
}

impl std::fmt::Debug for RateLimitedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedClient")
            .field("user_agent", &self.shared.user_agent)
            .field("traffic", &self.shared.traffic)
            .field("pinned", &self.pinned.is_some())
            .finish()
    }
}

/// Builder for [`RateLimitedClient`]
#[derive(Debug)]
pub struct ClientBuilder {
    user_agent: String,
    max_rps: u32,
    timeout: Duration,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn Transport>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_rps: 0,
            timeout: Duration::from_secs(30),
            clock: None,
            transport: None,
        }
    }
}

impl ClientBuilder {
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Requests per second ceiling, 0 = unlimited
    pub fn max_rps(mut self, max_rps: u32) -> Self {
        self.max_rps = max_rps;
        self
    }

    /// Timeout applied by the default transport
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the default reqwest transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the client and start its window ticker
    ///
    /// Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<RateLimitedClient, HttpError> {
        debug!(user_agent = %self.user_agent, max_rps = self.max_rps, "ClientBuilder::build: called");
        let user_agent_header = HeaderValue::from_str(&self.user_agent)?;
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::new(http.clone())));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let traffic = Arc::new(Traffic::new(clock.now(), self.max_rps));
        traffic.roll(clock.now());

        let cancel = CancellationToken::new();
        tokio::spawn(window_ticker(Arc::clone(&traffic), Arc::clone(&clock), cancel.clone()));

        Ok(RateLimitedClient {
            shared: Arc::new(Shared {
                user_agent: self.user_agent,
                user_agent_header,
                http,
                transport: RwScalarBox::new(transport),
                traffic,
                clock,
                _ticker: cancel.drop_guard(),
            }),
            pinned: None,
        })
    }
}

/// Reset the window counter once per window for the client's lifetime
async fn window_ticker(traffic: Arc<Traffic>, clock: Arc<dyn Clock>, cancel: CancellationToken) {
    debug!("window_ticker: started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("window_ticker: stopped");
                break;
            }
            _ = clock.sleep(WINDOW) => {}
        }
        let previous = traffic.roll(clock.now());
        trace!(rps = previous, "window_ticker: window closed");
    }
}

impl RateLimitedClient {
    /// Client with the given user agent and no ceiling
    pub fn new(user_agent: impl Into<String>) -> Result<Self, HttpError> {
        Self::builder().user_agent(user_agent).build()
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, HttpError> {
        debug!(?config, "RateLimitedClient::from_config: called");
        Self::builder()
            .user_agent(config.user_agent.clone())
            .max_rps(config.max_rps)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
    }

    /// Change the requests per second ceiling, 0 = unlimited
    pub fn set_max_rps(&self, max_rps: u32) {
        debug!(max_rps, "RateLimitedClient::set_max_rps: called");
        self.shared.traffic.max_rps.store(max_rps, Ordering::SeqCst);
    }

    pub fn max_rps(&self) -> u32 {
        self.shared.traffic.max_rps.load(Ordering::SeqCst)
    }

    /// Requests counted in the last complete window
    pub fn rps(&self) -> u32 {
        self.shared.traffic.rps.load(Ordering::SeqCst)
    }

    /// Total response body bytes read
    pub fn bytes_downloaded(&self) -> u64 {
        self.shared.traffic.bytes_downloaded.load(Ordering::SeqCst)
    }

    /// Total request body bytes sent
    pub fn bytes_uploaded(&self) -> u64 {
        self.shared.traffic.bytes_uploaded.load(Ordering::SeqCst)
    }

    pub fn user_agent(&self) -> &str {
        &self.shared.user_agent
    }

    /// Replace the shared transport for every later request
    ///
    /// Requests already running finish on the transport they started with.
    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        debug!("RateLimitedClient::set_transport: called");
        self.shared.transport.set(transport);
    }

    /// A handle pinned to `transport`, sharing this client's counters and throttle
    ///
    /// Other handles keep using the shared transport.
    pub fn with_transport(&self, transport: Arc<dyn Transport>) -> Self {
        debug!("RateLimitedClient::with_transport: called");
        Self {
            shared: Arc::clone(&self.shared),
            pinned: Some(transport),
        }
    }

    fn transport(&self) -> Arc<dyn Transport> {
        match &self.pinned {
            Some(transport) => Arc::clone(transport),
            None => self.shared.transport.get(),
        }
    }

    /// Count this request and wait for the window to close if over the ceiling
    async fn throttle(&self) {
        let traffic = &self.shared.traffic;
        let count = traffic.window_count.fetch_add(1, Ordering::SeqCst) + 1;
        let max = traffic.max_rps.load(Ordering::SeqCst);
        if max == 0 || count <= max {
            return;
        }
        let now = self.shared.clock.now();
        let end = traffic.window_end();
        if end > now {
            debug!(count, max, wait = ?(end - now), "RateLimitedClient::throttle: over ceiling, sleeping");
            self.shared.clock.sleep(end - now).await;
        }
    }

    /// Send a prepared request
    pub async fn execute(&self, mut request: reqwest::Request) -> Result<Response, HttpError> {
        debug!(method = %request.method(), url = %request.url(), "RateLimitedClient::execute: called");
        self.throttle().await;

        request.headers_mut().insert(USER_AGENT, self.shared.user_agent_header.clone());
        let uploaded = request
            .body()
            .and_then(|body| body.as_bytes())
            .map_or(0, |bytes| bytes.len() as u64);

        let transport = self.transport();
        let response = transport.round_trip(request).await?;
        let response = Response::buffer(response).await?;

        let traffic = &self.shared.traffic;
        traffic.bytes_downloaded.fetch_add(response.len() as u64, Ordering::SeqCst);
        traffic.bytes_uploaded.fetch_add(uploaded, Ordering::SeqCst);
        debug!(status = %response.status(), bytes = response.len(), "RateLimitedClient::execute: done");
        Ok(response)
    }

    pub async fn get(&self, url: impl IntoUrl) -> Result<Response, HttpError> {
        let request = self.shared.http.get(url).build()?;
        self.execute(request).await
    }

    pub async fn post(
        &self,
        url: impl IntoUrl,
        content_type: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<Response, HttpError> {
        let request = self
            .shared
            .http
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .build()?;
        self.execute(request).await
    }

    /// POST `form` as `application/x-www-form-urlencoded`
    pub async fn post_form<T: Serialize + ?Sized>(&self, url: impl IntoUrl, form: &T) -> Result<Response, HttpError> {
        let request = self.shared.http.post(url).form(form).build()?;
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use async_trait::async_trait;
    use lockbox::SliceBox;

    /// Echoes a fixed body and remembers what it was sent
    #[derive(Debug)]
    struct Recorder {
        body: &'static str,
        seen: SliceBox<(String, Option<String>)>,
    }

    impl Recorder {
        fn new(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                body,
                seen: SliceBox::new(),
            })
        }
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
            let ua = request
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.seen.push((request.url().to_string(), ua));
            let response = http::Response::builder().status(200).body(self.body).unwrap();
            Ok(reqwest::Response::from(response))
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl Transport for Failing {
        async fn round_trip(&self, _request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
            Err(reqwest::Client::new().get("::not-a-url").build().unwrap_err())
        }
    }

    fn client_with(transport: Arc<dyn Transport>, clock: Arc<FakeClock>, max_rps: u32) -> RateLimitedClient {
        RateLimitedClient::builder()
            .user_agent("test-agent")
            .max_rps(max_rps)
            .clock(clock)
            .transport(transport)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_user_agent_attached() {
        let recorder = Recorder::new("OK");
        let client = client_with(recorder.clone(), Arc::new(FakeClock::new()), 0);

        let response = client.get("http://test.local/page").await.unwrap();
        assert_eq!(response.text(), "OK");
        assert_eq!(client.user_agent(), "test-agent");

        let seen = recorder.seen.to_vec();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "http://test.local/page");
        assert_eq!(seen[0].1.as_deref(), Some("test-agent"));
    }

    #[tokio::test]
    async fn test_byte_counters() {
        let client = client_with(Recorder::new("hello"), Arc::new(FakeClock::new()), 0);

        client.get("http://test.local/").await.unwrap();
        client.post("http://test.local/", "text/plain", "abc").await.unwrap();
        client
            .post_form("http://test.local/", &[("k", "v"), ("x", "yz")])
            .await
            .unwrap();

        // "k=v&x=yz" is 8 bytes
        assert_eq!(client.bytes_downloaded(), 15);
        assert_eq!(client.bytes_uploaded(), 3 + 8);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let client = client_with(Arc::new(Failing), Arc::new(FakeClock::new()), 0);
        let err = client.get("http://test.local/").await.unwrap_err();
        assert!(matches!(err, HttpError::Transport(_)));
        assert_eq!(client.bytes_downloaded(), 0);
        assert_eq!(client.bytes_uploaded(), 0);
    }

    #[tokio::test]
    async fn test_at_ceiling_never_sleeps() {
        let clock = Arc::new(FakeClock::new());
        let client = client_with(Recorder::new("OK"), clock.clone(), 3);
        clock.block_until(1).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            for _ in 0..3 {
                client.get("http://test.local/").await.unwrap();
            }
        })
        .await
        .expect("requests within the ceiling must not sleep");
        assert_eq!(clock.sleepers(), 1);
    }

    #[tokio::test]
    async fn test_over_ceiling_waits_for_window_boundary() {
        let clock = Arc::new(FakeClock::new());
        let client = client_with(Recorder::new("OK"), clock.clone(), 2);
        // Ticker is parked on its window sleep
        clock.block_until(1).await;
        let start = clock.now();

        client.get("http://test.local/a").await.unwrap();
        client.get("http://test.local/b").await.unwrap();

        let extra = tokio::spawn({
            let client = client.clone();
            async move { client.get("http://test.local/c").await.map(|r| r.len()) }
        });

        // Ticker plus the throttled request
        clock.block_until(2).await;
        assert!(!extra.is_finished());

        clock.advance(WINDOW);
        assert_eq!(extra.await.unwrap().unwrap(), 2);
        assert_eq!(clock.now() - start, WINDOW);

        // Ticker rolled the window and published the count
        clock.block_until(1).await;
        assert_eq!(client.rps(), 3);
    }

    #[tokio::test]
    async fn test_unlimited_when_zero() {
        let clock = Arc::new(FakeClock::new());
        let client = client_with(Recorder::new(""), clock.clone(), 0);
        clock.block_until(1).await;
        for _ in 0..50 {
            client.get("http://test.local/").await.unwrap();
        }
        assert_eq!(clock.sleepers(), 1);
    }

    #[tokio::test]
    async fn test_set_max_rps() {
        let client = client_with(Recorder::new(""), Arc::new(FakeClock::new()), 0);
        assert_eq!(client.max_rps(), 0);
        client.set_max_rps(7);
        assert_eq!(client.max_rps(), 7);
    }

    #[tokio::test]
    async fn test_set_transport_swaps_for_later_requests() {
        let first = Recorder::new("first");
        let second = Recorder::new("second");
        let client = client_with(first.clone(), Arc::new(FakeClock::new()), 0);

        assert_eq!(client.get("http://test.local/").await.unwrap().text(), "first");
        client.set_transport(second.clone());
        assert_eq!(client.get("http://test.local/").await.unwrap().text(), "second");
        assert_eq!(first.seen.len(), 1);
        assert_eq!(second.seen.len(), 1);
    }

    #[tokio::test]
    async fn test_with_transport_is_scoped_to_handle() {
        let shared = Recorder::new("shared");
        let scoped = Recorder::new("scoped");
        let client = client_with(shared.clone(), Arc::new(FakeClock::new()), 0);

        let pinned = client.with_transport(scoped.clone());
        assert_eq!(pinned.get("http://test.local/").await.unwrap().text(), "scoped");
        assert_eq!(client.get("http://test.local/").await.unwrap().text(), "shared");

        // Counters are shared between handles
        assert_eq!(client.bytes_downloaded(), 12);
        assert_eq!(pinned.bytes_downloaded(), 12);
    }

    #[tokio::test]
    async fn test_json_response() {
        let client = client_with(Recorder::new(r#"{"ok":true}"#), Arc::new(FakeClock::new()), 0);
        let value: serde_json::Value = client.get("http://test.local/").await.unwrap().json().unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_non_ascii_user_agent_kept() {
        let recorder = Recorder::new("OK");
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new());
        let client = RateLimitedClient::builder()
            .user_agent("café/1.0")
            .clock(clock)
            .transport(recorder.clone())
            .build()
            .unwrap();
        assert_eq!(client.user_agent(), "café/1.0");

        client.get("http://test.local/").await.unwrap();
        assert_eq!(recorder.seen.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_user_agent_rejected() {
        let result = RateLimitedClient::builder().user_agent("bad\r\nagent").build();
        assert!(matches!(result, Err(HttpError::InvalidUserAgent(_))));
    }
}
