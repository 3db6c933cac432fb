//! Retry with exponential backoff and jitter
//!
//! The [`Retry`] middleware sits outside every other layer of a client's
//! chain. Before the first attempt it reads a streaming body into memory, so
//! every attempt sends an intact copy of the same bytes.

use super::middleware::{Middleware, Next};
use super::request::{Body, Request};
use super::response::Response;
use crate::error::{Error, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::warn;

/// Relative spread applied to every computed delay (±25%)
pub const BACKOFF_JITTER: f64 = 0.25;

/// Statuses retried unless overridden
pub const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// When and how long to retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first; 0 disables retries
    pub max_retries: u32,
    /// Base delay before the first retry
    pub wait_min: Duration,
    /// Upper bound for any single delay
    pub wait_max: Duration,
    /// Response statuses treated as transient
    pub retryable_statuses: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            wait_min: Duration::from_secs(1),
            wait_max: Duration::from_secs(30),
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    /// Default policy with `max_retries` extra attempts
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_retries > 0
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay before retry number `attempt + 1`
    ///
    /// `wait_min * 2^attempt`, scaled by a uniform factor in `[0.75, 1.25]`,
    /// capped at `wait_max`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = rand::rng().random_range((1.0 - BACKOFF_JITTER)..=(1.0 + BACKOFF_JITTER));
        self.backoff_with_factor(attempt, factor)
    }

    fn backoff_with_factor(&self, attempt: u32, factor: f64) -> Duration {
        if self.wait_min.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.wait_min.as_secs_f64() * 2f64.powi(exponent) * factor;
        if delay >= self.wait_max.as_secs_f64() {
            return self.wait_max;
        }
        Duration::from_secs_f64(delay)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.wait_min > self.wait_max {
            return Err(Error::config(format!(
                "retry wait_min ({:?}) exceeds wait_max ({:?})",
                self.wait_min, self.wait_max
            )));
        }
        Ok(())
    }
}

/// Middleware replaying retryable outcomes
///
/// An attempt is retried when the transport failed, or when the response
/// status is in the policy's retryable set. After `max_retries` extra
/// attempts the last outcome is returned as-is, including a retryable
/// status response with `Ok`.
#[derive(Debug, Clone)]
pub struct Retry {
    policy: RetryPolicy,
}

impl Retry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl Middleware for Retry {
    async fn handle(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
        if let Some(body) = request.take_body() {
            request.set_body(Body::from(body.buffer().await?));
        }

        let max_retries = self.policy.max_retries;
        let mut attempt = 0;

        loop {
            let attempt_request = request
                .try_clone()
                .ok_or_else(|| Error::config("request body cannot be replayed"))?;
            let outcome = next.run(attempt_request).await;

            let retryable = match &outcome {
                Ok(response) => self.policy.is_retryable_status(response.status_code()),
                Err(e) => e.is_retryable(),
            };
            if !retryable || attempt >= max_retries {
                return outcome;
            }

            let delay = self.policy.backoff(attempt);
            match &outcome {
                Ok(response) => warn!(
                    "{} {} returned {}, attempt {}/{}, retrying in {:?}",
                    request.method(),
                    request.url(),
                    response.status_code(),
                    attempt + 1,
                    max_retries + 1,
                    delay
                ),
                Err(e) => warn!(
                    "{} {} failed: {}, attempt {}/{}, retrying in {:?}",
                    request.method(),
                    request.url(),
                    e,
                    attempt + 1,
                    max_retries + 1,
                    delay
                ),
            }
            // Responses are already buffered; dropping releases everything.
            drop(outcome);

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
