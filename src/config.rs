//! Client configuration files
//!
//! Integrations usually keep their client settings next to the rest of
//! their configuration. [`ClientConfig`] is the serde form of a
//! [`ClientBuilder`](crate::http::ClientBuilder), loadable from YAML or JSON.
//!
//! ```yaml
//! base_url: https://api.example.com
//! timeout_seconds: 10
//! headers:
//!   X-Team: core
//! retry:
//!   max_retries: 3
//!   wait_min_ms: 200
//!   wait_max_ms: 5000
//! rate_limit:
//!   requests_per_second: 5
//!   burst: 10
//! redirect: none
//! ```

use crate::error::{Error, Result};
use crate::http::{RateLimiterConfig, RedirectPolicy, RetryPolicy, DEFAULT_RETRYABLE_STATUSES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Serializable client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Prefix for relative request paths
    #[serde(default)]
    pub base_url: Option<String>,

    /// Overrides the default `User-Agent`
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Per-attempt timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Default headers for all requests
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Log every attempt at debug level
    #[serde(default)]
    pub debug: bool,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Rate limiting; absent means unthrottled
    #[serde(default)]
    pub rate_limit: Option<RateLimiterConfig>,

    /// Redirect handling
    #[serde(default)]
    pub redirect: RedirectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_agent: None,
            timeout_seconds: default_timeout(),
            headers: BTreeMap::new(),
            debug: false,
            retry: RetryConfig::default(),
            rate_limit: None,
            redirect: RedirectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Parse from a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a file; `.json` files are JSON, anything else YAML
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read client config '{}': {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }
}

fn default_timeout() -> u64 {
    30
}

/// Retry section of [`ClientConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Extra attempts after the first
    #[serde(default)]
    pub max_retries: u32,

    /// Base backoff in milliseconds
    #[serde(default = "default_wait_min_ms")]
    pub wait_min_ms: u64,

    /// Backoff cap in milliseconds
    #[serde(default = "default_wait_max_ms")]
    pub wait_max_ms: u64,

    /// HTTP status codes to retry on
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            wait_min_ms: default_wait_min_ms(),
            wait_max_ms: default_wait_max_ms(),
            retryable_statuses: default_retryable_statuses(),
        }
    }
}

fn default_wait_min_ms() -> u64 {
    1000
}

fn default_wait_max_ms() -> u64 {
    30000
}

fn default_retryable_statuses() -> Vec<u16> {
    DEFAULT_RETRYABLE_STATUSES.to_vec()
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            wait_min: Duration::from_millis(config.wait_min_ms),
            wait_max: Duration::from_millis(config.wait_max_ms),
            retryable_statuses: config.retryable_statuses.iter().copied().collect(),
        }
    }
}
