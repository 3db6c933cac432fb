//! HTTP client with middleware, retry and rate limiting
//!
//! A [`Client`] is an immutable snapshot of configuration behind an `Arc`.
//! Cloning it is cheap and every clone sees the same settings; deriving a
//! differently configured client goes through [`Client::with`] or
//! [`Client::to_builder`], which copy the headers and middleware list and
//! share the transport and rate limiter.

use super::middleware::{Middleware, Next, RequestLogger};
use super::rate_limit::{RateLimit, RateLimiter, RateLimiterConfig};
use super::request::{basic_auth_value, parse_header, Body, Request, RequestBuilder};
use super::response::Response;
use super::retry::{Retry, RetryPolicy};
use super::transport::{HttpTransport, RedirectPolicy, Transport};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Default per-attempt network timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Identifying `User-Agent` sent unless overridden
pub fn default_user_agent() -> String {
    format!("{}/{}", crate::NAME, crate::VERSION)
}

// ============================================================================
// ClientBuilder
// ============================================================================

/// Builder for [`Client`]
///
/// Methods apply in call order and never fail; the first invalid setting is
/// reported by [`build`](Self::build).
pub struct ClientBuilder {
    base_url: Option<String>,
    default_headers: HeaderMap,
    middlewares: Vec<Arc<dyn Middleware>>,
    retry: RetryPolicy,
    rate_limiter: Option<RateLimiter>,
    timeout: Duration,
    redirect: RedirectPolicy,
    debug: bool,
    transport: Option<Arc<dyn Transport>>,
    custom_transport: bool,
    error: Option<Error>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        let mut default_headers = HeaderMap::new();
        if let Ok(agent) = HeaderValue::from_str(&default_user_agent()) {
            default_headers.insert(USER_AGENT, agent);
        }
        Self {
            base_url: None,
            default_headers,
            middlewares: Vec::new(),
            retry: RetryPolicy::default(),
            rate_limiter: None,
            timeout: DEFAULT_TIMEOUT,
            redirect: RedirectPolicy::default(),
            debug: false,
            transport: None,
            custom_transport: false,
            error: None,
        }
    }
}

impl ClientBuilder {
    /// Seed a builder from deserialized configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut builder = Self::default()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .headers(&config.headers)
            .retry_policy(RetryPolicy::from(&config.retry))
            .redirect(config.redirect)
            .debug(config.debug);
        if let Some(base_url) = &config.base_url {
            builder = builder.base_url(base_url);
        }
        if let Some(agent) = &config.user_agent {
            builder = builder.user_agent(agent);
        }
        if let Some(rate_limit) = &config.rate_limit {
            builder = builder.rate_limit_config(rate_limit);
        }
        builder
    }

    /// Prefix for relative request paths
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Add a default header, replacing an earlier value for the same name
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match parse_header(name.as_ref(), value.as_ref()) {
            Ok((name, value)) => {
                self.default_headers.insert(name, value);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Add several default headers
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.header(name, value);
        }
        self
    }

    /// Send `Authorization: Bearer <token>` on every request
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header(AUTHORIZATION, value)
    }

    /// Send basic credentials on every request
    pub fn basic_auth(self, username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        let value = basic_auth_value(username.as_ref(), password.as_ref());
        self.header(AUTHORIZATION, value)
    }

    /// Set user agent
    pub fn user_agent(self, agent: impl AsRef<str>) -> Self {
        self.header(USER_AGENT, agent)
    }

    /// Append a middleware; later ones wrap earlier ones
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Append an already shared middleware
    pub fn middleware_arc(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Set max retries, keeping the current backoff bounds
    pub fn retry(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    /// Set max retries and backoff bounds
    pub fn retry_with_backoff(mut self, max_retries: u32, wait_min: Duration, wait_max: Duration) -> Self {
        self.retry.max_retries = max_retries;
        self.retry.wait_min = wait_min;
        self.retry.wait_max = wait_max;
        self
    }

    /// Replace the set of statuses worth retrying
    pub fn retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry.retryable_statuses = statuses.into_iter().collect();
        self
    }

    /// Replace the whole retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Throttle to `requests_per_second`, burst `ceil(requests_per_second)`
    pub fn rate_limit(self, requests_per_second: f64) -> Self {
        self.rate_limit_config(&RateLimiterConfig::new(requests_per_second))
    }

    /// Throttle to `requests_per_second` with an explicit burst
    pub fn rate_limit_with_burst(self, requests_per_second: f64, burst: u32) -> Self {
        self.rate_limit_config(&RateLimiterConfig::new(requests_per_second).with_burst(burst))
    }

    /// Throttle with a fresh limiter built from `config`
    pub fn rate_limit_config(mut self, config: &RateLimiterConfig) -> Self {
        match RateLimiter::new(config) {
            Ok(limiter) => self.rate_limiter = Some(limiter),
            Err(err) => self.fail(err),
        }
        self
    }

    /// Throttle through an existing, possibly shared, limiter
    pub fn rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Disable rate limiting
    pub fn no_rate_limit(mut self) -> Self {
        self.rate_limiter = None;
        self
    }

    /// Log every attempt at debug level
    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = enabled;
        self
    }

    /// Send through a custom transport instead of reqwest
    ///
    /// Redirect settings only apply to the default transport.
    pub fn transport(mut self, transport: impl Transport) -> Self {
        self.transport = Some(Arc::new(transport));
        self.custom_transport = true;
        self
    }

    /// Set the per-attempt network timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how the default transport follows redirects
    pub fn redirect(mut self, policy: RedirectPolicy) -> Self {
        if policy != self.redirect && !self.custom_transport {
            // Redirects are baked into the reqwest client; build a new one.
            self.transport = None;
        }
        self.redirect = policy;
        self
    }

    /// Return 3xx responses instead of following them
    pub fn no_redirects(self) -> Self {
        self.redirect(RedirectPolicy::None)
    }

    /// Follow at most `max` redirects
    pub fn max_redirects(self, max: usize) -> Self {
        self.redirect(RedirectPolicy::Limited(max))
    }

    /// Validate the configuration and build the client
    pub fn build(self) -> Result<Client> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if let Some(base_url) = &self.base_url {
            Url::parse(base_url).map_err(|source| Error::InvalidUrl {
                url: base_url.clone(),
                source,
            })?;
        }
        if self.timeout.is_zero() {
            return Err(Error::config("timeout must be greater than zero"));
        }
        self.retry.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.redirect)?),
        };

        // Inner to outer: logger, user middleware, rate limit, retry.
        let mut chain: Vec<Arc<dyn Middleware>> = Vec::with_capacity(self.middlewares.len() + 3);
        if self.debug {
            chain.push(Arc::new(RequestLogger));
        }
        chain.extend(self.middlewares.iter().cloned());
        if let Some(limiter) = &self.rate_limiter {
            chain.push(Arc::new(RateLimit::new(limiter.clone())));
        }
        if self.retry.is_enabled() {
            chain.push(Arc::new(Retry::new(self.retry.clone())));
        }

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                custom_transport: self.custom_transport,
                base_url: self.base_url,
                default_headers: self.default_headers,
                middlewares: self.middlewares,
                chain,
                retry: self.retry,
                rate_limiter: self.rate_limiter,
                timeout: self.timeout,
                redirect: self.redirect,
                debug: self.debug,
            }),
        })
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

impl std::fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("redirect", &self.redirect)
            .field("middlewares", &self.middlewares.len())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client
// ============================================================================

struct ClientInner {
    transport: Arc<dyn Transport>,
    custom_transport: bool,
    base_url: Option<String>,
    default_headers: HeaderMap,
    middlewares: Vec<Arc<dyn Middleware>>,
    chain: Vec<Arc<dyn Middleware>>,
    retry: RetryPolicy,
    rate_limiter: Option<RateLimiter>,
    timeout: Duration,
    redirect: RedirectPolicy,
    debug: bool,
}

/// HTTP client shared by an integration's call sites
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Client with default configuration
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a new client builder
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Build a client from deserialized configuration
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        ClientBuilder::from_config(config).build()
    }

    /// Builder seeded with a copy of this client's configuration
    ///
    /// The transport and rate limiter stay shared with this client.
    pub fn to_builder(&self) -> ClientBuilder {
        let inner = &self.inner;
        ClientBuilder {
            base_url: inner.base_url.clone(),
            default_headers: inner.default_headers.clone(),
            middlewares: inner.middlewares.clone(),
            retry: inner.retry.clone(),
            rate_limiter: inner.rate_limiter.clone(),
            timeout: inner.timeout,
            redirect: inner.redirect,
            debug: inner.debug,
            transport: Some(Arc::clone(&inner.transport)),
            custom_transport: inner.custom_transport,
            error: None,
        }
    }

    /// Derive a scoped client without touching this one
    ///
    /// ```ignore
    /// let upload = client.with(|b| b.timeout(Duration::from_secs(300)).header("X-Upload", "1"))?;
    /// ```
    pub fn with<F>(&self, configure: F) -> Result<Client>
    where
        F: FnOnce(ClientBuilder) -> ClientBuilder,
    {
        configure(self.to_builder()).build()
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn base_url(&self) -> Option<&str> {
        self.inner.base_url.as_deref()
    }

    pub fn default_headers(&self) -> &HeaderMap {
        &self.inner.default_headers
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn redirect_policy(&self) -> RedirectPolicy {
        self.inner.redirect
    }

    pub fn rate_limiter(&self) -> Option<&RateLimiter> {
        self.inner.rate_limiter.as_ref()
    }

    /// Check if rate limiting is enabled
    pub fn has_rate_limiter(&self) -> bool {
        self.inner.rate_limiter.is_some()
    }

    /// Number of user-supplied middlewares
    pub fn middleware_count(&self) -> usize {
        self.inner.middlewares.len()
    }

    pub fn is_debug(&self) -> bool {
        self.inner.debug
    }

    // ------------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------------

    /// Start building a request
    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(self.clone(), method, path)
    }

    /// Send a fully formed request through the configured chain
    ///
    /// Default headers fill only the slots the request left empty. A
    /// completed exchange is `Ok` whatever its status; `Err` means the server
    /// could not be reached, the context ended, or a middleware failed.
    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        self.apply_defaults(&mut request);

        let context = request.context().clone();
        if let Some(err) = context.err() {
            return Err(err);
        }

        let method = request.method().clone();
        let url = request.url().clone();
        let next = Next::new(&self.inner.chain, self.inner.transport.as_ref());

        let result = tokio::select! {
            biased;
            err = context.done() => Err(err),
            result = next.run(request) => result,
        };

        match &result {
            Ok(response) => debug!("Request completed: {} {} -> {}", method, url, response.status()),
            Err(e) => debug!("Request failed: {} {}: {}", method, url, e),
        }
        result
    }

    fn apply_defaults(&self, request: &mut Request) {
        let defaults = &self.inner.default_headers;
        let headers = request.headers_mut();
        for name in defaults.keys() {
            if headers.contains_key(name) {
                continue;
            }
            for value in defaults.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        if request.timeout().is_none() {
            request.set_timeout(self.inner.timeout);
        }
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.request(Method::GET, path).send().await
    }

    /// Make a DELETE request
    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.request(Method::DELETE, path).send().await
    }

    /// Make a POST request
    pub async fn post(&self, path: &str, body: impl Into<Body>) -> Result<Response> {
        self.request(Method::POST, path).body(body).send().await
    }

    /// Make a PUT request
    pub async fn put(&self, path: &str, body: impl Into<Body>) -> Result<Response> {
        self.request(Method::PUT, path).body(body).send().await
    }

    /// Make a PATCH request
    pub async fn patch(&self, path: &str, body: impl Into<Body>) -> Result<Response> {
        self.request(Method::PATCH, path).body(body).send().await
    }

    /// Make a GET request and parse JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path).json().await
    }

    /// Make a DELETE request and parse JSON response
    pub async fn delete_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::DELETE, path).json().await
    }

    /// POST `body` as JSON and parse JSON response
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::POST, path).body_json(body).json().await
    }

    /// PUT `body` as JSON and parse JSON response
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PUT, path).body_json(body).json().await
    }

    /// PATCH `body` as JSON and parse JSON response
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.request(Method::PATCH, path).body_json(body).json().await
    }

    /// Build full URL from path
    pub(crate) fn build_url(&self, path: &str) -> String {
        build_url(self.inner.base_url.as_deref(), path)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url)
            .field("retry", &self.inner.retry)
            .field("timeout", &self.inner.timeout)
            .field("redirect", &self.inner.redirect)
            .field("has_rate_limiter", &self.inner.rate_limiter.is_some())
            .field("middlewares", &self.inner.middlewares.len())
            .field("debug", &self.inner.debug)
            .finish_non_exhaustive()
    }
}

/// Join a base URL and a path
///
/// Absolute `http://` / `https://` paths (scheme in any case) ignore the
/// base entirely. Exactly one `/` separates base and path.
pub fn build_url(base_url: Option<&str>, path: &str) -> String {
    if is_absolute(path) {
        return path.to_string();
    }

    match base_url {
        Some(base) => {
            let base = base.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
        None => path.to_string(),
    }
}

fn is_absolute(path: &str) -> bool {
    ["http://", "https://"].iter().any(|scheme| {
        path.get(..scheme.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
    })
}
