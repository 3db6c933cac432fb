//! Request interception
//!
//! A [`Middleware`] receives the request together with a [`Next`] handle
//! for the rest of the chain. It may change the request, inspect or replace
//! the response, call `next` several times, or answer without calling it.
//!
//! Chains are ordered inner to outer: the first middleware registered on a
//! client sits closest to the transport, the last one sees the request first.
//!
//! ```text
//! execute ─▶ Retry ─▶ RateLimit ─▶ mw[n-1] ─▶ … ─▶ mw[0] ─▶ RequestLogger ─▶ Transport
//! ```

use super::request::Request;
use super::response::Response;
use super::transport::Transport;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::header::{HeaderName, AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Composable wrapper around the send operation
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response>;
}

/// The remainder of a middleware chain
///
/// `Next` is `Copy`, so a middleware can run the rest of the chain more than
/// once (that is how retries replay user middleware on every attempt).
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    /// Chain over `middlewares` (inner to outer) ending at `transport`
    pub fn new(middlewares: &'a [Arc<dyn Middleware>], transport: &'a dyn Transport) -> Self {
        Self {
            middlewares,
            transport,
        }
    }

    /// Run the rest of the chain
    pub async fn run(self, request: Request) -> Result<Response> {
        match self.middlewares.split_last() {
            Some((outer, rest)) => {
                let next = Next {
                    middlewares: rest,
                    transport: self.transport,
                };
                outer.handle(request, next).await
            }
            None => self.transport.send(request).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("remaining", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Closure middleware
// ============================================================================

/// Middleware that edits every outgoing request
///
/// Created by [`map_request`].
pub struct MapRequest<F> {
    f: F,
}

/// Wrap a request-editing closure as middleware
///
/// The closure runs once per attempt, so signing or auth headers it sets are
/// fresh on every retry. Returning an error aborts the call.
pub fn map_request<F>(f: F) -> MapRequest<F>
where
    F: Fn(&mut Request) -> Result<()> + Send + Sync + 'static,
{
    MapRequest { f }
}

#[async_trait]
impl<F> Middleware for MapRequest<F>
where
    F: Fn(&mut Request) -> Result<()> + Send + Sync + 'static,
{
    async fn handle(&self, mut request: Request, next: Next<'_>) -> Result<Response> {
        (self.f)(&mut request)?;
        next.run(request).await
    }
}

// ============================================================================
// Request logger
// ============================================================================

const REDACTED_HEADERS: [HeaderName; 3] = [AUTHORIZATION, COOKIE, PROXY_AUTHORIZATION];

/// Logs every attempt at debug level; installed by the client's `debug` option
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogger;

#[async_trait]
impl Middleware for RequestLogger {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        let headers: Vec<String> = request
            .headers()
            .iter()
            .map(|(name, value)| {
                if REDACTED_HEADERS.contains(name) {
                    format!("{name}: [redacted]")
                } else {
                    format!("{name}: {}", value.to_str().unwrap_or("<binary>"))
                }
            })
            .collect();
        debug!(headers = ?headers, "--> {} {}", method, url);

        let started = Instant::now();
        let result = next.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => debug!(
                elapsed_ms,
                bytes = response.bytes().len(),
                "<-- {} {} {}",
                response.status_code(),
                method,
                url
            ),
            Err(e) => debug!(elapsed_ms, "<-- {} {} failed: {}", method, url, e),
        }
        result
    }
}

#[cfg(test)]
mod middleware_tests {
    use super::*;
    use crate::error::Error;
    use reqwest::header::HeaderValue;
    use reqwest::{Method, StatusCode};
    use std::sync::Mutex;
    use url::Url;

    /// Records the `x-trail` header it receives and answers 200
    #[derive(Default)]
    struct EchoTransport {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, request: Request) -> Result<Response> {
            let trail = request
                .headers()
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.seen.lock().unwrap().push(trail);
            Ok(Response::new(StatusCode::OK, Default::default(), ""))
        }
    }

    fn append_trail(tag: &'static str) -> Arc<dyn Middleware> {
        Arc::new(map_request(move |req: &mut Request| {
            let current = req
                .headers()
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            let next = if current.is_empty() {
                tag.to_string()
            } else {
                format!("{current},{tag}")
            };
            req.headers_mut()
                .insert("x-trail", HeaderValue::from_str(&next).unwrap());
            Ok(())
        }))
    }

    fn request() -> Request {
        Request::new(Method::GET, Url::parse("https://api.example.com/").unwrap())
    }

    #[tokio::test]
    async fn test_last_declared_runs_first() {
        let transport = EchoTransport::default();
        let chain = vec![append_trail("first"), append_trail("second"), append_trail("third")];

        Next::new(&chain, &transport).run(request()).await.unwrap();

        // Outermost (last declared) edits first, so the innermost tag ends the trail.
        assert_eq!(
            transport.seen.lock().unwrap().as_slice(),
            ["third,second,first"]
        );
    }

    #[tokio::test]
    async fn test_empty_chain_hits_transport() {
        let transport = EchoTransport::default();
        let response = Next::new(&[], &transport).run(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_map_request_error_short_circuits() {
        let transport = EchoTransport::default();
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(map_request(|_req: &mut Request| {
            Err(Error::from(anyhow::anyhow!("missing signing key")))
        }))];

        let err = Next::new(&chain, &transport).run(request()).await.unwrap_err();
        assert_eq!(err.to_string(), "missing signing key");
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    struct ShortCircuit;

    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, _request: Request, _next: Next<'_>) -> Result<Response> {
            Ok(Response::new(StatusCode::NOT_MODIFIED, Default::default(), ""))
        }
    }

    #[tokio::test]
    async fn test_middleware_can_answer_without_transport() {
        let transport = EchoTransport::default();
        let chain: Vec<Arc<dyn Middleware>> = vec![append_trail("inner"), Arc::new(ShortCircuit)];

        let response = Next::new(&chain, &transport).run(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_logger_passes_through() {
        let transport = EchoTransport::default();
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(RequestLogger)];
        let mut req = request();
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));

        let response = Next::new(&chain, &transport).run(req).await.unwrap();
        assert!(response.is_success());
    }
}
