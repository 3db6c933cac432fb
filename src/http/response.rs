//! Buffered HTTP responses
//!
//! A [`Response`] owns the complete body: it is read into memory once when
//! the exchange finishes, so the connection goes back to the pool before the
//! caller ever sees the response.

use crate::error::{Error, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;

/// A completed HTTP exchange with its body in memory
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    url: Option<Url>,
    body: Bytes,
}

impl Response {
    /// Create a response from its parts
    ///
    /// Mostly useful for custom transports and middleware that answer
    /// without touching the network.
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            url: None,
            body: body.into(),
        }
    }

    /// Attach the URL the response was served from
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Drain a reqwest response into a buffered one
    pub(crate) async fn from_reqwest(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let url = response.url().clone();
        let body = response.bytes().await?;
        Ok(Self {
            status,
            headers,
            url: Some(url),
            body,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    /// Canonical reason phrase, e.g. "Not Found"; empty for unknown codes
    pub fn status_text(&self) -> &'static str {
        self.status.canonical_reason().unwrap_or("")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First value of a header, if present and valid UTF-8
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v: &HeaderValue| v.to_str().ok())
    }

    /// Final URL after redirects, when the transport reported one
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    /// Body as text; invalid UTF-8 sequences are replaced
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Decode the body as JSON
    ///
    /// Pure function of the buffered bytes, so it can be called repeatedly.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|source| Error::Decode {
            status: self.status.as_u16(),
            source,
        })
    }

    /// Decode the body as a loosely-typed JSON object
    pub fn json_map(&self) -> Result<Map<String, Value>> {
        self.json()
    }

    // ============================================================================
    // Status classes
    // ============================================================================

    /// 200-299
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }

    /// 300-399
    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status_code())
    }

    /// 400-499
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// 500 and above
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// 400 and above
    pub fn is_error(&self) -> bool {
        self.status_code() >= 400
    }

    /// Turn an error status into an [`Error`]
    ///
    /// Returns [`Error::ClientError`] for 4xx, [`Error::ServerError`] for 5xx
    /// (both carrying a truncated body) and `Ok(())` otherwise.
    pub fn check_status(&self) -> Result<()> {
        if self.is_error() {
            return Err(Error::http_status(self.status_code(), self.text()));
        }
        Ok(())
    }

    /// Generic status check followed by an integration-specific one
    pub fn check_with<C: StatusCheck + ?Sized>(&self, checker: &C) -> Result<()> {
        self.check_status()?;
        checker.check(self)
    }
}

/// Integration-specific response validation
///
/// Services that report failures inside a 2xx body (error envelopes and the
/// like) implement this and run it through [`Response::check_with`].
pub trait StatusCheck {
    fn check(&self, response: &Response) -> Result<()>;
}

impl<F> StatusCheck for F
where
    F: Fn(&Response) -> Result<()>,
{
    fn check(&self, response: &Response) -> Result<()> {
        self(response)
    }
}

#[cfg(test)]
mod response_tests {
    use super::*;
    use serde::Deserialize;
    use test_case::test_case;

    fn response(status: u16, body: &'static str) -> Response {
        Response::new(
            StatusCode::from_u16(status).unwrap(),
            HeaderMap::new(),
            body,
        )
    }

    #[test]
    fn test_status_classes_partition_codes() {
        for code in 200..600u16 {
            let resp = response(code, "");
            let classes = [
                resp.is_success(),
                resp.is_redirect(),
                resp.is_client_error(),
                resp.is_server_error(),
            ];
            assert_eq!(
                classes.iter().filter(|c| **c).count(),
                1,
                "status {code} must be in exactly one class"
            );
            assert_eq!(
                resp.is_error(),
                resp.is_client_error() || resp.is_server_error(),
                "is_error mismatch for {code}"
            );
        }
    }

    #[test_case(200, true ; "ok")]
    #[test_case(204, true ; "no content")]
    #[test_case(301, true ; "redirect")]
    #[test_case(404, false ; "not found")]
    #[test_case(503, false ; "unavailable")]
    fn test_check_status(status: u16, ok: bool) {
        assert_eq!(response(status, "nope").check_status().is_ok(), ok);
    }

    #[test]
    fn test_check_status_classification() {
        let err = response(422, "invalid").check_status().unwrap_err();
        assert!(matches!(err, Error::ClientError { status: 422, ref body } if body == "invalid"));

        let err = response(500, "boom").check_status().unwrap_err();
        assert!(matches!(err, Error::ServerError { status: 500, .. }));
    }

    #[test]
    fn test_json_decodes_repeatedly() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct User {
            id: u32,
            name: String,
        }

        let resp = response(200, r#"{"id": 7, "name": "Ada"}"#);
        let first: User = resp.json().unwrap();
        let second: User = resp.json().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.name, "Ada");

        let map = resp.json_map().unwrap();
        assert_eq!(map["id"], 7);
        assert_eq!(resp.text(), r#"{"id": 7, "name": "Ada"}"#);
    }

    #[test]
    fn test_json_decode_error_carries_status() {
        let err = response(502, "<html>").json::<Value>().unwrap_err();
        assert!(matches!(err, Error::Decode { status: 502, .. }));
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn test_status_text_and_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        let resp = Response::new(StatusCode::NOT_FOUND, headers, "");
        assert_eq!(resp.status_text(), "Not Found");
        assert_eq!(resp.header("x-request-id"), Some("abc"));
        assert_eq!(resp.header("missing"), None);
        assert!(resp.url().is_none());
    }

    #[test]
    fn test_check_with_runs_generic_check_first() {
        let envelope = |resp: &Response| -> Result<()> {
            let body: Value = resp.json()?;
            match body.get("ok").and_then(Value::as_bool) {
                Some(true) => Ok(()),
                _ => Err(Error::config("service reported failure")),
            }
        };

        assert!(response(200, r#"{"ok": true}"#).check_with(&envelope).is_ok());
        assert!(matches!(
            response(200, r#"{"ok": false}"#).check_with(&envelope),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            response(404, r#"{"ok": true}"#).check_with(&envelope),
            Err(Error::ClientError { status: 404, .. })
        ));
    }
}
