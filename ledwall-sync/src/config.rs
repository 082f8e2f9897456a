//! Client configuration.
//!
//! All endpoints hang off a single API base URL (`http://host:port/api`):
//!
//! | Endpoint | URL |
//! |----------|-----|
//! | Initial fetch | `{base}/leds` |
//! | Single LED | `{base}/leds/{id}` |
//! | Stream | `{base}/leds/ws` with `http→ws`, `https→wss` |

use std::time::Duration;

use thiserror::Error;
use url::Url;

/// Environment variable holding the API base URL.
pub const BASE_URL_ENV: &str = "LEDWALL_API_BASE_URL";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("Unsupported URL scheme {0:?} (expected http or https)")]
    UnsupportedScheme(String),
    #[error("Environment variable {0} is not set")]
    MissingEnv(&'static str),
}

/// Auto-reconnect policy for the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Ceiling for the delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 1.5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt + 1`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff(
            self.initial_delay_ms,
            self.max_delay_ms,
            self.backoff_multiplier,
            attempt,
        )
    }

    /// Whether `failures` consecutive failed attempts exhaust the policy.
    pub fn gives_up_after(&self, failures: u32) -> bool {
        self.max_attempts > 0 && failures >= self.max_attempts
    }
}

/// Bounded retry for the initial fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5000,
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        backoff(self.initial_delay_ms, self.max_delay_ms, 2.0, attempt)
    }
}

fn backoff(initial_ms: u64, max_ms: u64, multiplier: f64, attempt: u32) -> Duration {
    let exponent = attempt.min(64) as i32;
    let delay = initial_ms as f64 * multiplier.powi(exponent);
    // `as` saturates, so an infinite product lands on the ceiling.
    Duration::from_millis((delay as u64).min(max_ms))
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// API base URL without a trailing slash
    base_url: String,
    /// Interval between `"ping"` frames
    pub keepalive_interval: Duration,
    pub reconnect: ReconnectConfig,
    pub fetch_retry: RetryConfig,
    /// Asks the device for a snapshot cadence (ms); the device clamps it
    pub snapshot_interval_ms: Option<u64>,
    /// Outbound frames buffered while the socket is busy
    pub outbound_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reconnect: ReconnectConfig::default(),
            fetch_retry: RetryConfig::default(),
            snapshot_interval_ms: None,
            outbound_capacity: 256,
        }
    }
}

impl SyncConfig {
    /// Validate `base_url` and use defaults for everything else.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let parsed = Url::parse(base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        match parsed.scheme() {
            "http" | "https" => {}
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            ..Self::default()
        })
    }

    /// Read the base URL from [`BASE_URL_ENV`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let base = std::env::var(BASE_URL_ENV).map_err(|_| ConfigError::MissingEnv(BASE_URL_ENV))?;
        Self::new(&base)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn leds_url(&self) -> String {
        format!("{}/leds", self.base_url)
    }

    pub fn led_url(&self, id: usize) -> String {
        format!("{}/leds/{id}", self.base_url)
    }

    /// The streaming endpoint, with the websocket scheme and the optional
    /// `snapshot_interval` query.
    pub fn stream_url(&self) -> Result<Url, ConfigError> {
        let raw = format!("{}/leds/ws", self.base_url);
        let mut url = Url::parse(&raw).map_err(|e| ConfigError::InvalidBaseUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::UnsupportedScheme(scheme.to_string()))?;

        if let Some(interval) = self.snapshot_interval_ms {
            url.query_pairs_mut()
                .append_pair("snapshot_interval", &interval.to_string());
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_points_at_localhost() {
        let config = SyncConfig::default();
        assert_eq!(config.leds_url(), "http://localhost:8000/api/leds");
        assert_eq!(config.keepalive_interval, Duration::from_secs(60));
        assert_eq!(config.reconnect.max_attempts, 0);
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let config = SyncConfig::new("https://lights.example.com/api/").unwrap();
        assert_eq!(config.base_url(), "https://lights.example.com/api");
        assert_eq!(config.led_url(7), "https://lights.example.com/api/leds/7");
    }

    #[test]
    fn test_stream_url_scheme() {
        let plain = SyncConfig::new("http://127.0.0.1:8000/api").unwrap();
        assert_eq!(plain.stream_url().unwrap().as_str(), "ws://127.0.0.1:8000/api/leds/ws");

        let tls = SyncConfig::new("https://lights.example.com").unwrap();
        assert_eq!(tls.stream_url().unwrap().as_str(), "wss://lights.example.com/leds/ws");
    }

    #[test]
    fn test_stream_url_snapshot_interval() {
        let mut config = SyncConfig::new("http://localhost:8000/api").unwrap();
        config.snapshot_interval_ms = Some(250);
        assert_eq!(
            config.stream_url().unwrap().as_str(),
            "ws://localhost:8000/api/leds/ws?snapshot_interval=250"
        );
    }

    #[test]
    fn test_rejects_bad_base_urls() {
        assert!(matches!(
            SyncConfig::new("not a url"),
            Err(ConfigError::InvalidBaseUrl { .. })
        ));
        assert_eq!(
            SyncConfig::new("ftp://example.com").unwrap_err(),
            ConfigError::UnsupportedScheme("ftp".into())
        );
    }

    #[test]
    fn test_reconnect_backoff_has_ceiling() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1500));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2250));
        assert_eq!(config.delay_for_attempt(50), Duration::from_millis(30_000));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_reconnect_infinite_by_default() {
        let config = ReconnectConfig::default();
        assert!(!config.gives_up_after(1_000_000));

        let bounded = ReconnectConfig {
            max_attempts: 3,
            ..ReconnectConfig::default()
        };
        assert!(!bounded.gives_up_after(2));
        assert!(bounded.gives_up_after(3));
    }

    #[test]
    fn test_fetch_retry_backoff() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_millis(5000));
    }
}
