use std::env;
use std::path::PathBuf;
use std::time::Duration;

use lms_core::model::CurriculumVersion;
use rand::Rng;
use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_CACHE_DIR: &str = ".tkx-cache";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;

/// Backoff schedule shared by push retries, fetch retries, and reconnects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Attempts for bounded retries (the background progress fetch).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_attempts: 8,
        }
    }
}

impl RetryPolicy {
    /// Tight schedule for tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            max_attempts: 5,
        }
    }

    /// Delay before retry number `attempt` (0-based): doubling, capped, plus up to 10% jitter.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(2_u32.saturating_pow(attempt.min(16)))
            .min(self.max_backoff);
        let jitter_ms = u64::try_from(base.as_millis() / 10).unwrap_or(0);
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Runtime settings for a client session.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// `host:port` of the live update channel; `None` runs without live updates.
    pub live_addr: Option<String>,
    pub cache_dir: PathBuf,
    pub version: CurriculumVersion,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.into(),
            live_addr: None,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            version: CurriculumVersion::default(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Read `TKX_API_BASE_URL`, `TKX_LIVE_ADDR`, `TKX_CACHE_DIR`, `TKX_VERSION`,
    /// and `TKX_HTTP_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an invalid value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("TKX_API_BASE_URL") {
            config = config.with_api_base_url(url)?;
        }
        config.live_addr = get("TKX_LIVE_ADDR");
        if let Some(dir) = get("TKX_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(version) = get("TKX_VERSION") {
            config.version = version.parse()?;
        }
        if let Some(raw) = get("TKX_HTTP_TIMEOUT_SECS") {
            let secs: u64 = raw
                .parse()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidNumber {
                    name: "TKX_HTTP_TIMEOUT_SECS",
                    raw,
                })?;
            config.http_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }

    /// Replace the API base URL after checking it parses as an http(s) URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidBaseUrl` for anything else.
    pub fn with_api_base_url(mut self, raw: impl Into<String>) -> Result<Self, ConfigError> {
        let raw = raw.into();
        match Url::parse(&raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                self.api_base_url = raw.trim_end_matches('/').to_string();
                Ok(self)
            }
            _ => Err(ConfigError::InvalidBaseUrl(raw)),
        }
    }
}
