//! Rate limiting implementation
//!
//! Uses the governor crate (GCRA, equivalent to a token bucket). A single
//! [`RateLimiter`] may be shared by many clients; the [`RateLimit`]
//! middleware takes one admission per attempt.

use super::middleware::{Middleware, Next};
use super::request::Request;
use super::response::Response;
use crate::error::{Error, Result};
use async_trait::async_trait;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterConfig {
    /// Sustained admissions per second; fractions allowed
    pub requests_per_second: f64,
    /// Admissions available at once; defaults to `ceil(requests_per_second)`
    #[serde(default)]
    pub burst: Option<u32>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst: None,
        }
    }
}

impl RateLimiterConfig {
    /// Create a new rate limiter config
    pub fn new(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            burst: None,
        }
    }

    /// Set the burst size
    #[must_use]
    pub fn with_burst(mut self, burst: u32) -> Self {
        self.burst = Some(burst);
        self
    }

    /// Burst size after defaulting
    pub fn effective_burst(&self) -> u32 {
        self.burst
            .unwrap_or_else(|| self.requests_per_second.ceil().clamp(1.0, f64::from(u32::MAX)) as u32)
    }

    fn quota(&self) -> Result<Quota> {
        let rps = self.requests_per_second;
        if !rps.is_finite() || rps <= 0.0 {
            return Err(Error::config(format!(
                "rate limit must be a positive number of requests per second, got {rps}"
            )));
        }
        let burst = NonZeroU32::new(self.effective_burst())
            .ok_or_else(|| Error::config("rate limit burst must be at least 1"))?;
        let period = Duration::try_from_secs_f64(1.0 / rps)
            .ok()
            .filter(|period| period.as_nanos() * u128::from(burst.get()) <= u128::from(u64::MAX))
            .ok_or_else(|| Error::config(format!("rate limit of {rps}/s is too low")))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| Error::config(format!("rate limit of {rps}/s is too high")))?;
        Ok(quota.allow_burst(burst))
    }
}

/// Token bucket rate limiter
///
/// Cloning shares the bucket.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    /// Create a new rate limiter with the given config
    pub fn new(config: &RateLimiterConfig) -> Result<Self> {
        let quota = config.quota()?;
        Ok(Self {
            limiter: Arc::new(Governor::direct(quota)),
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Wait until a request can be made
    ///
    /// Only the awaiting task is suspended.
    pub async fn wait(&self) {
        self.limiter.until_ready().await;
    }

    /// Take an admission if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }

    /// Wait with a timeout; `false` if no admission was granted in time
    pub async fn wait_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.limiter.until_ready())
            .await
            .is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Middleware admitting each request through a [`RateLimiter`]
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: RateLimiter,
}

impl RateLimit {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

#[async_trait]
impl Middleware for RateLimit {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        if !self.limiter.try_acquire() {
            debug!(
                "Rate limit reached, waiting for admission: {} {}",
                request.method(),
                request.url()
            );
            self.limiter.wait().await;
        }
        next.run(request).await
    }
}
