//! Requests, request bodies and the per-call request builder

use super::client::Client;
use super::context::Context;
use super::response::Response;
use crate::error::{Error, Result};
use base64::Engine;
use bytes::{Bytes, BytesMut};
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use url::Url;

type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync>>;

// ============================================================================
// Body
// ============================================================================

/// A request body: bytes already in memory, or a single-read stream
pub struct Body {
    inner: BodyInner,
}

enum BodyInner {
    Bytes(Bytes),
    Stream(BodyStream),
}

impl Body {
    pub fn empty() -> Self {
        Self::from(Bytes::new())
    }

    /// A body produced by a stream of chunks; it can be read only once
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self {
            inner: BodyInner::Stream(Box::pin(stream)),
        }
    }

    /// A body read from an async reader; it can be read only once
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        Self::from_stream(ReaderStream::new(reader))
    }

    /// The bytes, unless the body is still a stream
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.inner {
            BodyInner::Bytes(bytes) => Some(bytes),
            BodyInner::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.inner, BodyInner::Stream(_))
    }

    /// Cheap copy of an in-memory body; `None` for streams
    pub fn try_clone(&self) -> Option<Body> {
        self.as_bytes().cloned().map(Body::from)
    }

    /// Read the whole body into memory, consuming any stream
    pub async fn buffer(self) -> Result<Bytes> {
        match self.inner {
            BodyInner::Bytes(bytes) => Ok(bytes),
            BodyInner::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk.map_err(Error::Body)?);
                }
                Ok(buf.freeze())
            }
        }
    }

    pub(crate) fn into_reqwest(self) -> reqwest::Body {
        match self.inner {
            BodyInner::Bytes(bytes) => reqwest::Body::from(bytes),
            BodyInner::Stream(stream) => reqwest::Body::wrap_stream(stream),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            BodyInner::Bytes(bytes) => f.debug_struct("Body").field("len", &bytes.len()).finish(),
            BodyInner::Stream(_) => f.debug_struct("Body").finish_non_exhaustive(),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            inner: BodyInner::Bytes(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from(Bytes::from_static(text.as_bytes()))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::from(Bytes::from_static(bytes))
    }
}

// ============================================================================
// Request
// ============================================================================

/// A fully formed request as it travels through the middleware chain
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Option<Body>,
    timeout: Option<Duration>,
    context: Context,
}

/// Owned pieces of a [`Request`], as handed to a transport
#[derive(Debug)]
pub struct RequestParts {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Body>,
    pub timeout: Option<Duration>,
    pub context: Context,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            context: Context::background(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn url_mut(&mut self) -> &mut Url {
        &mut self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.body = Some(body.into());
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Per-attempt network timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }

    /// Copy the request; `None` when the body is a stream
    pub fn try_clone(&self) -> Option<Request> {
        let body = match &self.body {
            Some(body) => Some(body.try_clone()?),
            None => None,
        };
        Some(Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body,
            timeout: self.timeout,
            context: self.context.clone(),
        })
    }

    pub fn into_parts(self) -> RequestParts {
        RequestParts {
            method: self.method,
            url: self.url,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
            context: self.context,
        }
    }
}

// ============================================================================
// RequestBuilder
// ============================================================================

/// Fluent, per-call request assembly
///
/// Builder methods never fail. Invalid headers and body encoding failures
/// are remembered and returned by [`send`](Self::send) or [`json`](Self::json).
#[must_use = "a RequestBuilder does nothing until it is sent"]
pub struct RequestBuilder {
    client: Client,
    method: Method,
    target: String,
    headers: HeaderMap,
    query: Vec<(String, String)>,
    body: Option<Body>,
    context: Context,
    timeout: Option<Duration>,
    error: Option<Error>,
}

impl RequestBuilder {
    pub(crate) fn new(client: Client, method: Method, target: impl Into<String>) -> Self {
        Self {
            client,
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: None,
            context: Context::background(),
            timeout: None,
            error: None,
        }
    }

    /// Set a header for this call, overriding any client default
    pub fn header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        match parse_header(name.as_ref(), value.as_ref()) {
            Ok((name, value)) => {
                self.headers.insert(name, value);
            }
            Err(err) => self.fail(err),
        }
        self
    }

    /// Set several headers for this call
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

    /// Bearer token for this call only
    pub fn bearer_auth(self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        self.header(AUTHORIZATION, value)
    }

    /// Basic credentials for this call only
    pub fn basic_auth(self, username: impl AsRef<str>, password: impl AsRef<str>) -> Self {
        let value = basic_auth_value(username.as_ref(), password.as_ref());
        self.header(AUTHORIZATION, value)
    }

    /// Append a query parameter; repeated keys are kept
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Append several query parameters
    pub fn query_params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Set the body; the last body setter called wins
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn body_string(self, body: impl Into<String>) -> Self {
        self.body(body.into())
    }

    pub fn body_bytes(self, body: impl Into<Bytes>) -> Self {
        self.body(body.into())
    }

    /// Stream the body from an async reader
    pub fn body_reader<R>(self, reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        self.body(Body::from_reader(reader))
    }

    /// Serialize `value` as the JSON body and set `Content-Type: application/json`
    pub fn body_json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.headers
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                self.body = Some(Body::from(bytes));
            }
            Err(e) => self.fail(Error::encode(e.to_string())),
        }
        self
    }

    /// Form-encode `fields` as the body and set the form content type
    pub fn body_form<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.body = Some(Body::from(encoded));
        self
    }

    /// Attach a cancellation context
    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Override the client's per-attempt timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Assemble the request without sending it
    pub fn build(self) -> Result<Request> {
        self.into_parts().map(|(_, request)| request)
    }

    /// Execute through the owning client
    pub async fn send(self) -> Result<Response> {
        let (client, request) = self.into_parts()?;
        client.execute(request).await
    }

    /// Execute and decode the response body as JSON
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        self.send().await?.json()
    }

    fn into_parts(self) -> Result<(Client, Request)> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let target = self.client.build_url(&self.target);
        let mut url = Url::parse(&target).map_err(|source| Error::InvalidUrl {
            url: target.clone(),
            source,
        })?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }

        let mut request = Request::new(self.method, url);
        *request.headers_mut() = self.headers;
        request.body = self.body;
        request.timeout = self.timeout;
        request.context = self.context;
        Ok((self.client, request))
    }

    fn fail(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("query", &self.query)
            .field("has_body", &self.body.is_some())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue)> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::invalid_header(format!("'{name}': {e}")))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|e| Error::invalid_header(format!("value for '{name}': {e}")))?;
    Ok((header_name, header_value))
}

pub(crate) fn basic_auth_value(username: &str, password: &str) -> String {
    let credentials = format!("{username}:{password}");
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(credentials)
    )
}

#[cfg(test)]
mod request_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn client() -> Client {
        Client::builder()
            .base_url("https://api.example.com/v1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_query_appended_to_plain_url() {
        let request = client()
            .request(Method::GET, "/search")
            .query("q", "rust lang")
            .query("tag", "a")
            .query("tag", "b")
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/search?q=rust+lang&tag=a&tag=b"
        );
    }

    #[test]
    fn test_query_joined_to_existing_query() {
        let request = client()
            .request(Method::GET, "/search?sort=desc")
            .query_params([("page", "2")])
            .build()
            .unwrap();

        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/v1/search?sort=desc&page=2"
        );
    }

    #[test]
    fn test_body_json_sets_content_type() {
        let request = client()
            .request(Method::POST, "/items")
            .body_json(&serde_json::json!({"name": "demo"}))
            .build()
            .unwrap();

        assert_eq!(request.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(
            request.body().and_then(Body::as_bytes).unwrap().as_ref(),
            br#"{"name":"demo"}"#
        );
    }

    #[test]
    fn test_body_form_encodes_fields() {
        let request = client()
            .request(Method::POST, "/token")
            .body_form([("grant_type", "client_credentials"), ("scope", "a b")])
            .build()
            .unwrap();

        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        assert_eq!(
            request.body().and_then(Body::as_bytes).unwrap().as_ref(),
            b"grant_type=client_credentials&scope=a+b"
        );
    }

    #[test]
    fn test_last_body_setter_wins() {
        let request = client()
            .request(Method::PUT, "/items/1")
            .body_string("first")
            .body_bytes(Bytes::from_static(b"second"))
            .build()
            .unwrap();

        assert_eq!(
            request.body().and_then(Body::as_bytes).unwrap().as_ref(),
            b"second"
        );
    }

    #[test]
    fn test_json_encoding_error_is_deferred() {
        struct Unserializable;

        impl Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(
                &self,
                _serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("not representable"))
            }
        }

        // Builder keeps going after the failure; the error shows up at the end.
        let builder = client()
            .request(Method::POST, "/items")
            .body_json(&Unserializable)
            .header("X-Trace", "1");

        let err = builder.build().unwrap_err();
        assert!(matches!(err, Error::Encode { .. }));
    }

    #[test]
    fn test_invalid_header_is_deferred() {
        let err = client()
            .request(Method::GET, "/")
            .header("bad header", "value")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidHeader { .. }));
    }

    #[test]
    fn test_relative_path_without_base_url_fails() {
        let client = Client::builder().build().unwrap();
        let err = client.request(Method::GET, "/users").build().unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));
    }

    #[test]
    fn test_per_call_auth_headers() {
        let request = client()
            .request(Method::GET, "/me")
            .basic_auth("user", "pass")
            .build()
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Basic dXNlcjpwYXNz");

        let request = client()
            .request(Method::GET, "/me")
            .bearer_auth("tok")
            .build()
            .unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer tok");
    }

    #[tokio::test]
    async fn test_stream_body_buffers_once() {
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ]);
        let body = Body::from_stream(chunks);
        assert!(body.is_stream());
        assert!(body.try_clone().is_none());

        let bytes = body.buffer().await.unwrap();
        assert_eq!(bytes.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn test_stream_body_error_surfaces() {
        let chunks = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("disk gone")),
        ]);
        let err = Body::from_stream(chunks).buffer().await.unwrap_err();
        assert!(matches!(err, Error::Body(_)));
    }

    #[test]
    fn test_request_try_clone() {
        let mut request = Request::new(
            Method::POST,
            Url::parse("https://api.example.com/items").unwrap(),
        );
        request.set_body("payload");
        let copy = request.try_clone().unwrap();
        assert_eq!(copy.body().and_then(Body::as_bytes), request.body().and_then(Body::as_bytes));

        request.set_body(Body::from_reader(tokio::io::empty()));
        assert!(request.try_clone().is_none());
    }
}
