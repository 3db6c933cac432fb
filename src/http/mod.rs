//! HTTP client module
//!
//! Provides the shared client with middleware, retry and rate limiting.
//!
//! # Features
//!
//! - **Middleware**: Ordered interceptors around the transport, re-run on every attempt
//! - **Automatic Retries**: Exponential backoff with ±25% jitter, replayable bodies
//! - **Rate Limiting**: Token bucket rate limiter using governor, one admission per attempt
//! - **Cancellation**: Per-call cancellation tokens and deadlines
//! - **Buffered Responses**: Bodies read once, decoded as often as needed

mod client;
mod context;
mod middleware;
mod rate_limit;
mod request;
mod response;
mod retry;
mod transport;

pub use client::{build_url, default_user_agent, Client, ClientBuilder, DEFAULT_TIMEOUT};
pub use context::Context;
pub use middleware::{map_request, MapRequest, Middleware, Next, RequestLogger};
pub use rate_limit::{RateLimit, RateLimiter, RateLimiterConfig};
pub use request::{Body, Request, RequestBuilder, RequestParts};
pub use response::{Response, StatusCheck};
pub use retry::{Retry, RetryPolicy, BACKOFF_JITTER, DEFAULT_RETRYABLE_STATUSES};
pub use transport::{HttpTransport, RedirectPolicy, Transport};

pub use reqwest::header;
pub use reqwest::{Method, StatusCode};
