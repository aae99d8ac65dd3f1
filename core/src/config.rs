//! Session manager configuration.
//!
//! Values should be provided by the application; [`SessionConfig::from_env`]
//! reads the `COURIER_*` variables for binaries and development builds.

use std::time::Duration;

use crate::error::ConfigError;
use crate::session::UserId;
use crate::token::AccessToken;

/// Environment variable names.
pub mod env_keys {
    /// REST base URL.
    pub const API_URL: &str = "COURIER_API_URL";
    /// Realtime endpoint.
    pub const REALTIME_URL: &str = "COURIER_REALTIME_URL";
    /// Fixed reconnect delay in milliseconds.
    pub const RECONNECT_DELAY_MS: &str = "COURIER_RECONNECT_DELAY_MS";
    /// Validity poll interval in seconds.
    pub const VALIDITY_POLL_SECS: &str = "COURIER_VALIDITY_POLL_SECS";
    /// Refresh leeway in seconds.
    pub const REFRESH_LEEWAY_SECS: &str = "COURIER_REFRESH_LEEWAY_SECS";
    /// HTTP request timeout in seconds.
    pub const HTTP_TIMEOUT_SECS: &str = "COURIER_HTTP_TIMEOUT_SECS";
}

// ═══════════════════════════════════════════════════════════════════════
// Reconnect policy
// ═══════════════════════════════════════════════════════════════════════

/// Delay between realtime reconnect attempts.
///
/// # Default Values
///
/// `Fixed(5s)`. The delay is always honoured, so a connection that fails
/// immediately never produces a tight loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Same delay after every failure.
    Fixed(Duration),

    /// `initial * multiplier ^ failures`, capped at `max`.
    Exponential {
        /// Delay after the first failure
        initial: Duration,
        /// Cap
        max: Duration,
        /// Growth factor
        multiplier: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(Duration::from_secs(5))
    }
}

impl ReconnectPolicy {
    /// Calculate the delay before reconnecting after `failures` consecutive
    /// failures (0 = first failure since the connection was last open).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        match self {
            Self::Fixed(delay) => *delay,
            Self::Exponential {
                initial,
                max,
                multiplier,
            } => {
                if failures == 0 {
                    return (*initial).min(*max);
                }

                let delay_ms =
                    initial.as_millis() as f64 * multiplier.powi(failures.min(63) as i32);

                if !delay_ms.is_finite() || delay_ms >= max.as_millis() as f64 {
                    *max
                } else {
                    Duration::from_millis(delay_ms as u64)
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: "realtime.reconnect".to_string(),
            reason: reason.to_string(),
        };

        match self {
            Self::Fixed(delay) if delay.is_zero() => Err(invalid("delay must be non-zero")),
            Self::Exponential { initial, .. } if initial.is_zero() => {
                Err(invalid("initial delay must be non-zero"))
            }
            Self::Exponential { initial, max, .. } if max < initial => {
                Err(invalid("max delay must be >= initial delay"))
            }
            Self::Exponential { multiplier, .. } if *multiplier < 1.0 => {
                Err(invalid("multiplier must be >= 1.0"))
            }
            _ => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════════════════════════════════

/// REST endpoint configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL (e.g., "https://api.example.com").
    pub base_url: String,

    /// Per-request timeout.
    ///
    /// Default: 15 seconds
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl ApiConfig {
    /// Full URL for an endpoint path.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Realtime connection configuration.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Endpoint without credentials (e.g., "wss://api.example.com/ws").
    pub endpoint: String,

    /// Reconnect delay policy.
    pub reconnect: ReconnectPolicy,

    /// Upper bound for a graceful close.
    ///
    /// Default: 2 seconds
    pub close_timeout: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:3000/ws".to_string(),
            reconnect: ReconnectPolicy::default(),
            close_timeout: Duration::from_secs(2),
        }
    }
}

impl RealtimeConfig {
    /// Connect URL bound to the given identity and token.
    ///
    /// Called at connect time so a token refreshed during a reconnect delay
    /// is the one that ends up on the wire.
    #[must_use]
    pub fn connect_url(&self, user_id: &UserId, token: &AccessToken) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}userId={}&token={}",
            self.endpoint,
            urlencoding::encode(user_id.as_str()),
            urlencoding::encode(token.as_str())
        )
    }
}

/// Token lifecycle configuration.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// How long before expiry `ensure_valid()` starts refreshing.
    ///
    /// Default: 0 (refresh only once expired)
    pub refresh_leeway: Duration,

    /// Interval of the periodic validity check while signed in.
    ///
    /// Default: 30 seconds
    pub validity_poll_interval: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_leeway: Duration::ZERO,
            validity_poll_interval: Duration::from_secs(30),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Root
// ═══════════════════════════════════════════════════════════════════════

/// Root configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// REST endpoints
    pub api: ApiConfig,
    /// Realtime connection
    pub realtime: RealtimeConfig,
    /// Token lifecycle
    pub tokens: TokenConfig,
}

impl SessionConfig {
    /// Load configuration from the process environment.
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but unparsable, or the result fails
    /// [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary lookup function.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup(env_keys::API_URL) {
            config.api.base_url = url;
        }
        if let Some(url) = lookup(env_keys::REALTIME_URL) {
            config.realtime.endpoint = url;
        }
        if let Some(ms) = parse_u64(&lookup, env_keys::RECONNECT_DELAY_MS)? {
            config.realtime.reconnect = ReconnectPolicy::Fixed(Duration::from_millis(ms));
        }
        if let Some(secs) = parse_u64(&lookup, env_keys::VALIDITY_POLL_SECS)? {
            config.tokens.validity_poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, env_keys::REFRESH_LEEWAY_SECS)? {
            config.tokens.refresh_leeway = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, env_keys::HTTP_TIMEOUT_SECS)? {
            config.api.request_timeout = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate entire configuration
    ///
    /// # Errors
    ///
    /// Returns error if any section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.base_url.is_empty() {
            return Err(ConfigError::Missing("api.base_url".to_string()));
        }
        if !(self.realtime.endpoint.starts_with("ws://")
            || self.realtime.endpoint.starts_with("wss://"))
        {
            return Err(ConfigError::InvalidValue {
                key: "realtime.endpoint".to_string(),
                reason: format!("expected ws:// or wss:// URL, got {}", self.realtime.endpoint),
            });
        }
        self.realtime.reconnect.validate()?;
        if self.tokens.validity_poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "tokens.validity_poll_interval".to_string(),
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Set the REST base URL.
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api.base_url = url.into();
        self
    }

    /// Set the realtime endpoint.
    #[must_use]
    pub fn with_realtime_endpoint(mut self, url: impl Into<String>) -> Self {
        self.realtime.endpoint = url.into();
        self
    }

    /// Set the reconnect policy.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.realtime.reconnect = policy;
        self
    }

    /// Set the validity poll interval.
    #[must_use]
    pub const fn with_validity_poll_interval(mut self, interval: Duration) -> Self {
        self.tokens.validity_poll_interval = interval;
        self
    }

    /// Set the refresh leeway.
    #[must_use]
    pub const fn with_refresh_leeway(mut self, leeway: Duration) -> Self {
        self.tokens.refresh_leeway = leeway;
        self
    }
}

fn parse_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<u64>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}
