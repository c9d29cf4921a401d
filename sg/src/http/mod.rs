//! Rate-limited HTTP client
//!
//! A thin wrapper over a pluggable [`Transport`] that caps outbound requests
//! per one-second window and keeps traffic statistics. It mirrors the verb
//! surface of a plain HTTP client; callers never see the throttling except as
//! added latency.

mod client;
mod error;
mod response;
mod transport;

pub use client::{ClientBuilder, DEFAULT_USER_AGENT, RateLimitedClient, WINDOW};
pub use error::HttpError;
pub use response::Response;
pub use transport::{ReqwestTransport, Transport};
