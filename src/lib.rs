// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # Courier
//!
//! Shared HTTP transport for service integrations. Every outbound call of
//! an integration goes through one [`Client`], which layers default
//! headers, user middleware, rate limiting and retries over a pluggable
//! transport.
//!
//! ## Features
//!
//! - **Immutable clients**: Cheap to clone, derive scoped variants with [`Client::with`]
//! - **Middleware**: Ordered interceptors for auth, signing, logging and tracing
//! - **Retries**: Exponential backoff with ±25% jitter, bodies replayed intact
//! - **Rate Limiting**: Token bucket admission for every attempt
//! - **Cancellation**: Per-call tokens and deadlines via [`Context`]
//! - **Configuration**: Build clients from YAML or JSON
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::{Client, Result};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com/v1")
//!         .bearer_auth("token")
//!         .retry(3)
//!         .rate_limit(5.0)
//!         .build()?;
//!
//!     let response = client.get("/users").await?;
//!     response.check_status()?;
//!     let users: serde_json::Value = response.json()?;
//!
//!     let uploads = client.with(|b| b.timeout(Duration::from_secs(300)))?;
//!     uploads.post("/files", "raw bytes").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │  Client::execute  (default headers, timeout, context race)    │
//! └───────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬────────────┐
//! │  Retry   │ RateLimit │  Middleware   │  Logger   │ Transport  │
//! ├──────────┼───────────┼───────────────┼───────────┼────────────┤
//! │ Backoff  │ Governor  │ map_request   │ debug     │ reqwest    │
//! │ Jitter   │ Shared    │ custom        │ redacted  │ custom     │
//! │ Buffering│ per-try   │ per-try       │ per-try   │            │
//! └──────────┴───────────┴───────────────┴───────────┴────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// HTTP client, middleware, retry and rate limiting
pub mod http;

/// Client configuration files
pub mod config;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ClientConfig, RetryConfig};
pub use error::{Error, Result};

// Re-export commonly used types
pub use http::{
    map_request, Body, Client, ClientBuilder, Context, Middleware, Next, RateLimiter,
    RateLimiterConfig, RedirectPolicy, Request, RequestBuilder, Response, RetryPolicy, Transport,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
