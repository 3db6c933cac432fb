//! Error types for courier
//!
//! Every fallible operation in the crate returns `Result<T, Error>`.
//! Transport failures and HTTP error statuses are kept apart:
//! a completed exchange with a 4xx/5xx status is an `Ok(Response)` until the
//! caller asks for [`Response::check_status`](crate::http::Response::check_status).

use thiserror::Error;

/// Longest response body excerpt kept inside an error
const MAX_ERROR_BODY_CHARS: usize = 512;

/// The main error type for courier
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Construction Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid header: {message}")]
    InvalidHeader { message: String },

    #[error("Failed to encode request body: {message}")]
    Encode { message: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // ============================================================================
    // Transport Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Failed to read request body: {0}")]
    Body(#[source] std::io::Error),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    // ============================================================================
    // HTTP Status Errors
    // ============================================================================
    #[error("HTTP {status} client error: {body}")]
    ClientError { status: u16, body: String },

    #[error("HTTP {status} server error: {body}")]
    ServerError { status: u16, body: String },

    // ============================================================================
    // Decode Errors
    // ============================================================================
    #[error("Failed to decode HTTP {status} response: {source}")]
    Decode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    // ============================================================================
    // Middleware Errors
    // ============================================================================
    #[error(transparent)]
    Middleware(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid header error
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Create a body encoding error
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Create a transport error, for custom [`Transport`](crate::http::Transport) implementations
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create the error matching an HTTP error status
    ///
    /// Statuses below 500 become [`Error::ClientError`], the rest [`Error::ServerError`].
    pub fn http_status(status: u16, body: impl AsRef<str>) -> Self {
        let body = truncate_body(body.as_ref());
        if status < 500 {
            Self::ClientError { status, body }
        } else {
            Self::ServerError { status, body }
        }
    }

    /// Whether the server could not be talked to at all
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Transport { .. } | Error::Body(_))
    }

    /// Whether the caller's context ended the request
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Check if this error is retryable
    ///
    /// Only transport-level failures are; an HTTP status is judged by the
    /// retry policy against the response, never through this error.
    pub fn is_retryable(&self) -> bool {
        self.is_transport()
    }

    /// HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::ClientError { status, .. }
            | Error::ServerError { status, .. }
            | Error::Decode { status, .. } => Some(*status),
            Error::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut truncated: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Result type alias for courier
pub type Result<T> = std::result::Result<T, Error>;
