//! Runtime configuration for the sync coordinator.
//!
//! `SyncSettings` tunes scheduling and retries. `BackendConfig` locates the
//! hosted backend and is normally loaded from the environment.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const ENV_BACKEND_URL: &str = "TANDEM_BACKEND_URL";
pub const ENV_ANON_KEY: &str = "TANDEM_ANON_KEY";
pub const ENV_ACCESS_TOKEN: &str = "TANDEM_ACCESS_TOKEN";
pub const ENV_STORAGE_BUCKET: &str = "TANDEM_STORAGE_BUCKET";

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(300);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_REALTIME_TOPIC: &str = "sync";

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A single attempt with no retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (1-based), doubling up to `max_delay`.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    #[must_use]
    pub const fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Scheduling and retry knobs for the orchestrator and engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Quiet period that absorbs bursts of sync requests
    pub debounce: Duration,
    /// How long shutdown waits for an in-flight run before cancelling it
    pub shutdown_timeout: Duration,
    pub retry: RetryPolicy,
    /// Rows per remote select page
    pub page_size: usize,
    pub realtime_topic: String,
    pub realtime_reconnect: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            retry: RetryPolicy::default(),
            page_size: DEFAULT_PAGE_SIZE,
            realtime_topic: DEFAULT_REALTIME_TOPIC.to_string(),
            realtime_reconnect: RetryPolicy {
                max_attempts: 8,
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
            },
        }
    }
}

impl SyncSettings {
    #[must_use]
    pub const fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub fn with_realtime_topic(mut self, topic: impl Into<String>) -> Self {
        self.realtime_topic = topic.into();
        self
    }

    #[must_use]
    pub const fn with_realtime_reconnect(mut self, reconnect: RetryPolicy) -> Self {
        self.realtime_reconnect = reconnect;
        self
    }

    /// Clamp values that would disable paging or retries entirely.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self.realtime_reconnect.max_attempts = self.realtime_reconnect.max_attempts.max(1);
        if self.realtime_topic.trim().is_empty() {
            self.realtime_topic = DEFAULT_REALTIME_TOPIC.to_string();
        }
        self
    }
}

/// Location and credentials of the hosted backend.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://project.example.co`
    pub base_url: String,
    /// Public API key sent with every request
    pub anon_key: String,
    /// Session token for row-level access; falls back to the anon key
    pub access_token: Option<String>,
    /// Object storage bucket for record assets
    pub storage_bucket: Option<String>,
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackendConfig")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("storage_bucket", &self.storage_bucket)
            .finish()
    }
}

impl BackendConfig {
    /// Build a validated config from explicit values.
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(Some(base_url.into()))?;
        let anon_key = normalize_text_option(Some(anon_key.into())).ok_or_else(|| {
            Error::InvalidInput("Backend anon key must not be empty".to_string())
        })?;
        Ok(Self {
            base_url,
            anon_key,
            access_token: None,
            storage_bucket: None,
        })
    }

    #[must_use]
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = normalize_text_option(token);
        self
    }

    #[must_use]
    pub fn with_storage_bucket(mut self, bucket: Option<String>) -> Self {
        self.storage_bucket = normalize_text_option(bucket);
        self
    }

    /// Load backend configuration from environment variables.
    ///
    /// Returns `Ok(None)` when no backend variables are set.
    /// Returns an error when only a partial configuration is provided.
    pub fn from_env() -> Result<Option<Self>> {
        parse_config(|key| env::var(key).ok())
    }

    /// Bearer token for data requests.
    #[must_use]
    pub fn bearer_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or(&self.anon_key)
    }

    /// Websocket endpoint of the realtime service.
    #[must_use]
    pub fn realtime_url(&self) -> String {
        let socket_base = self
            .base_url
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| {
                self.base_url
                    .strip_prefix("http://")
                    .map(|rest| format!("ws://{rest}"))
            })
            .unwrap_or_else(|| self.base_url.clone());
        format!(
            "{socket_base}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            urlencoding::encode(&self.anon_key)
        )
    }
}

fn parse_config(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<BackendConfig>> {
    let base_url = lookup(ENV_BACKEND_URL).map(|value| value.trim().to_string());
    let anon_key = lookup(ENV_ANON_KEY).map(|value| value.trim().to_string());
    let access_token = lookup(ENV_ACCESS_TOKEN);
    let storage_bucket = lookup(ENV_STORAGE_BUCKET);

    let any_present = base_url.is_some()
        || anon_key.is_some()
        || access_token.is_some()
        || storage_bucket.is_some();
    if !any_present {
        return Ok(None);
    }

    let mut missing = Vec::new();
    if base_url.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_BACKEND_URL);
    }
    if anon_key.as_ref().map_or(true, String::is_empty) {
        missing.push(ENV_ANON_KEY);
    }
    if !missing.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Backend configuration is incomplete. Missing: {}",
            missing.join(", ")
        )));
    }

    let (Some(base_url), Some(anon_key)) = (base_url, anon_key) else {
        return Ok(None);
    };
    Ok(Some(
        BackendConfig::new(base_url, anon_key)?
            .with_access_token(access_token)
            .with_storage_bucket(storage_bucket),
    ))
}

fn normalize_base_url(raw: Option<String>) -> Result<String> {
    let url = normalize_text_option(raw)
        .ok_or_else(|| Error::InvalidInput("Backend URL must not be empty".to_string()))?;
    if !is_http_url(&url) {
        return Err(Error::InvalidInput(format!(
            "Backend URL must include http:// or https://: {url}"
        )));
    }
    Ok(url.trim_end_matches('/').to_string())
}
