//! Network transports
//!
//! The [`Transport`] is the innermost link of every request chain. The
//! default [`HttpTransport`] delegates to `reqwest`, which owns connection
//! pooling, TLS and HTTP/2.

use super::request::Request;
use super::response::Response;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Terminal request sender
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send the request and buffer the complete response
    async fn send(&self, request: Request) -> Result<Response>;
}

/// How redirects are followed by the default transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectPolicy {
    /// reqwest's default: follow up to 10 hops
    #[default]
    Default,
    /// Never follow redirects; 3xx responses are returned as-is
    None,
    /// Follow at most this many hops
    Limited(usize),
}

impl From<RedirectPolicy> for reqwest::redirect::Policy {
    fn from(policy: RedirectPolicy) -> Self {
        match policy {
            RedirectPolicy::Default => reqwest::redirect::Policy::default(),
            RedirectPolicy::None => reqwest::redirect::Policy::none(),
            RedirectPolicy::Limited(max) => reqwest::redirect::Policy::limited(max),
        }
    }
}

/// Transport backed by a `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport with the given redirect policy
    pub fn new(redirect: RedirectPolicy) -> Result<Self> {
        let client = reqwest::Client::builder().redirect(redirect.into()).build()?;
        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let parts = request.into_parts();

        let mut req = self
            .client
            .request(parts.method, parts.url)
            .headers(parts.headers);
        if let Some(body) = parts.body {
            req = req.body(body.into_reqwest());
        }
        if let Some(timeout) = parts.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await?;
        Response::from_reqwest(response).await
    }
}
