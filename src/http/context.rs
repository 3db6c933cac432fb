//! Per-call cancellation
//!
//! A [`Context`] carries an optional cancellation token and an optional
//! deadline. The client races every call against it, so a cancelled or
//! expired context abandons the in-flight attempt, any rate-limit wait and
//! any backoff sleep.

use crate::error::Error;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation context attached to a request
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that never cancels
    pub fn background() -> Self {
        Self::default()
    }

    /// A context cancelled together with `token`
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            token: Some(token),
            deadline: None,
        }
    }

    /// Add a deadline `timeout` from now
    ///
    /// A timeout too large to represent leaves the context unchanged.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// Add an absolute deadline; an earlier existing deadline is kept
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// The deadline, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the error this context ends with, if it has already ended
    pub fn err(&self) -> Option<Error> {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some(Error::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(Error::DeadlineExceeded);
        }
        None
    }

    /// Resolves once the context is cancelled or its deadline passes
    ///
    /// Never resolves for a background context.
    pub(crate) async fn done(&self) -> Error {
        match (&self.token, self.deadline) {
            (Some(token), Some(deadline)) => {
                tokio::select! {
                    () = token.cancelled() => Error::Cancelled,
                    () = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            (Some(token), None) => {
                token.cancelled().await;
                Error::Cancelled
            }
            (None, Some(deadline)) => {
                tokio::time::sleep_until(deadline).await;
                Error::DeadlineExceeded
            }
            (None, None) => std::future::pending().await,
        }
    }
}
