//! Explicit client configuration.
//!
//! Nothing in the crate reads the process environment on its own; a
//! [`ClientConfig`] is built once (from the environment, CLI flags or code)
//! and handed to every constructor that needs it.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;
use url::Url;
use zeroize::Zeroizing;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Environment variables read by [`ClientConfig::from_env`].
pub const ENV_BASE_URL: &str = "URLGUARD_API_URL";
pub const ENV_ADMIN_KEY: &str = "URLGUARD_ADMIN_KEY";
pub const ENV_USE_FIXTURES: &str = "URLGUARD_USE_FIXTURES";
pub const ENV_REQUEST_TIMEOUT: &str = "URLGUARD_REQUEST_TIMEOUT";

/// Operator credential attached to privileged requests.
///
/// The backing buffer is zeroed on drop and never printed.
#[derive(Clone)]
pub struct AdminKey(Zeroizing<String>);

impl AdminKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(Zeroizing::new(key.into()))
    }

    /// Only the gateway should call this, to set the request header.
    pub fn expose_secret(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for AdminKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminKey(<redacted>)")
    }
}

/// Cadence of one recurring read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Timer period.
    pub interval: Duration,
    /// A refetch is skipped while the last success is younger than this.
    pub stale_after: Duration,
    /// Upper bound for the exponential backoff applied after failures.
    /// `None` keeps the plain interval.
    pub max_backoff: Option<Duration>,
}

impl PollPolicy {
    pub const fn new(interval: Duration, stale_after: Duration) -> Self {
        Self {
            interval,
            stale_after,
            max_backoff: None,
        }
    }

    pub const fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    /// Delay before the next attempt after `consecutive_failures` failures.
    ///
    /// Doubles the interval per failure, capped at `max_backoff`.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        let Some(cap) = self.max_backoff else {
            return self.interval;
        };
        if consecutive_failures == 0 {
            return self.interval;
        }
        let factor = 1u32 << consecutive_failures.min(16);
        self.interval.saturating_mul(factor).min(cap.max(self.interval))
    }
}

/// Polling cadence for every recurring read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    pub governance: PollPolicy,
    pub live_feed: PollPolicy,
    pub threat_map: PollPolicy,
    pub regions: PollPolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            governance: PollPolicy::new(Duration::from_secs(10), Duration::from_secs(8)),
            live_feed: PollPolicy::new(Duration::from_secs(5), Duration::from_secs(4))
                .with_max_backoff(Duration::from_secs(60)),
            threat_map: PollPolicy::new(Duration::from_secs(30), Duration::from_secs(25))
                .with_max_backoff(Duration::from_secs(300)),
            regions: PollPolicy::new(Duration::from_secs(60), Duration::from_secs(55))
                .with_max_backoff(Duration::from_secs(600)),
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub admin_key: Option<AdminKey>,
    /// Serve every call from the in-memory fixture service instead of HTTP.
    pub use_fixtures: bool,
    pub request_timeout: Duration,
    pub polling: PollingConfig,
}

impl ClientConfig {
    /// Builds a configuration for `base_url` with default cadence.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidBaseUrl`] when the URL cannot be parsed.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            admin_key: None,
            use_fixtures: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            polling: PollingConfig::default(),
        })
    }

    /// Fixture-backed configuration; no network access happens.
    ///
    /// # Errors
    /// Only fails if [`DEFAULT_BASE_URL`] stops parsing.
    pub fn fixtures() -> Result<Self, ConfigError> {
        Ok(Self::new(DEFAULT_BASE_URL)?.with_fixtures(true))
    }

    pub fn with_admin_key(mut self, key: AdminKey) -> Self {
        self.admin_key = Some(key);
        self
    }

    pub fn with_fixtures(mut self, use_fixtures: bool) -> Self {
        self.use_fixtures = use_fixtures;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    /// Loads an optional `.env` file, then reads the `URLGUARD_*` variables.
    ///
    /// # Errors
    /// See [`ClientConfig::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when a present value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_BASE_URL)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let mut config = Self::new(&base_url)?;

        config.admin_key = lookup(ENV_ADMIN_KEY)
            .filter(|key| !key.trim().is_empty())
            .map(AdminKey::new);

        if let Some(raw) = lookup(ENV_USE_FIXTURES) {
            config.use_fixtures = parse_flag(ENV_USE_FIXTURES, &raw)?;
        }

        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = humantime::parse_duration(raw.trim())
                .map_err(|source| ConfigError::InvalidDuration {
                    key: ENV_REQUEST_TIMEOUT,
                    value: raw.clone(),
                    source,
                })?;
        }

        Ok(config)
    }
}

/// Normalizes a user-supplied base URL.
///
/// `localhost:5000` becomes `http://localhost:5000`; trailing slashes are
/// trimmed so endpoint paths join without doubling.
///
/// # Errors
/// Returns [`ConfigError::InvalidBaseUrl`] when the result is not a valid URL.
pub fn normalize_base_url(raw: &str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let has_scheme =
        trimmed.starts_with("http://") || trimmed.starts_with("https://");
    let with_scheme = if has_scheme {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    if with_scheme != raw {
        warn!(
            original = raw,
            normalized = %with_scheme,
            "normalized analysis service base url"
        );
    }

    let url = Url::parse(&with_scheme).map_err(|source| ConfigError::InvalidBaseUrl {
        value: raw.to_string(),
        source,
    })?;
    if url.host_str().is_none() {
        return Err(ConfigError::MissingHost(raw.to_string()));
    }
    Ok(url)
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            key,
            value: raw.to_string(),
        }),
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base url '{value}': {source}")]
    InvalidBaseUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("base url '{0}' has no host")]
    MissingHost(String),
    #[error("{key} must be a boolean flag, got '{value}'")]
    InvalidFlag { key: &'static str, value: String },
    #[error("{key} must be a duration like '30s', got '{value}': {source}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_any_variables() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.base_url.as_str(), "http://127.0.0.1:5000/");
        assert!(config.admin_key.is_none());
        assert!(!config.use_fixtures);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!(config.polling.governance.interval, Duration::from_secs(10));
        assert_eq!(config.polling.governance.stale_after, Duration::from_secs(8));
    }

    #[test]
    fn reads_every_variable() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ENV_BASE_URL, "scanner.internal:8080/"),
            (ENV_ADMIN_KEY, "s3cret"),
            (ENV_USE_FIXTURES, "TRUE"),
            (ENV_REQUEST_TIMEOUT, "5s"),
        ]))
        .unwrap();

        assert_eq!(config.base_url.as_str(), "http://scanner.internal:8080/");
        assert_eq!(config.admin_key.as_ref().unwrap().expose_secret(), "s3cret");
        assert!(config.use_fixtures);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_bad_flag_and_duration() {
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_USE_FIXTURES, "maybe")])),
            Err(ConfigError::InvalidFlag { .. })
        ));
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[(ENV_REQUEST_TIMEOUT, "soon")])),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn admin_key_debug_is_redacted() {
        let key = AdminKey::new("hunter2");
        assert!(!format!("{key:?}").contains("hunter2"));
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = PollPolicy::new(Duration::from_secs(5), Duration::from_secs(4))
            .with_max_backoff(Duration::from_secs(60));
        assert_eq!(policy.next_delay(0), Duration::from_secs(5));
        assert_eq!(policy.next_delay(1), Duration::from_secs(10));
        assert_eq!(policy.next_delay(3), Duration::from_secs(40));
        assert_eq!(policy.next_delay(4), Duration::from_secs(60));
        assert_eq!(policy.next_delay(30), Duration::from_secs(60));

        let fixed = PollPolicy::new(Duration::from_secs(10), Duration::from_secs(8));
        assert_eq!(fixed.next_delay(7), Duration::from_secs(10));
    }
}
