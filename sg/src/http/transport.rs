//! Pluggable request transport

use async_trait::async_trait;
use tracing::debug;

/// Sends one request and returns the raw response
///
/// The rate-limited client reads the response body itself; transports only
/// move bytes.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error>;
}

/// Transport backed by a `reqwest::Client`
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn round_trip(&self, request: reqwest::Request) -> Result<reqwest::Response, reqwest::Error> {
        debug!(method = %request.method(), url = %request.url(), "ReqwestTransport::round_trip: called");
        self.client.execute(request).await
    }
}
