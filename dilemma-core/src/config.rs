//! Tunables for the session core.
//!
//! Reference values match the shipped game: conversations live for 24 hours,
//! the sweep runs hourly, collapse triggers below 20 of 100, and the
//! aftermath request is abandoned after 15 seconds.

use std::time::Duration;
use thiserror::Error;

/// Default lifetime of a conversation record.
pub const DEFAULT_CONVERSATION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default cadence of the background expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Shortest sweep cadence; `tokio::time::interval` rejects a zero period.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Default collapse threshold (exclusive).
pub const DEFAULT_COLLAPSE_THRESHOLD: u8 = 20;

/// Default bound on the aftermath request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Errors from reading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Which timestamp a conversation's lifetime is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryAnchor {
    /// Fixed wall-clock window from creation; activity does not extend it.
    #[default]
    CreatedAt,
    /// Sliding window from the most recent turn.
    LastUsedAt,
}

impl ExpiryAnchor {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "created" | "created-at" | "created_at" => Some(Self::CreatedAt),
            "last-used" | "last_used" | "last-used-at" | "last_used_at" => Some(Self::LastUsedAt),
            _ => None,
        }
    }
}

/// Configuration shared by the registry, the prefetch coordinator, and the
/// session controller.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// Maximum age of a conversation record.
    pub conversation_ttl: Duration,

    /// How often the background sweep runs.
    pub sweep_interval: Duration,

    /// Trackers strictly below this value count toward collapse.
    pub collapse_threshold: u8,

    /// Upper bound on one aftermath request.
    pub request_timeout: Duration,

    /// What the TTL is measured from.
    pub expiry_anchor: ExpiryAnchor,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            conversation_ttl: DEFAULT_CONVERSATION_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            collapse_threshold: DEFAULT_COLLAPSE_THRESHOLD,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            expiry_anchor: ExpiryAnchor::default(),
        }
    }
}

impl CoreConfig {
    /// Start from the reference values and override from `DILEMMA_*`
    /// environment variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = read_u64(&lookup, "DILEMMA_CONVERSATION_TTL_SECS")? {
            config.conversation_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64(&lookup, "DILEMMA_SWEEP_INTERVAL_SECS")? {
            if secs == 0 {
                return Err(invalid("DILEMMA_SWEEP_INTERVAL_SECS", "0", "must be positive"));
            }
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(threshold) = read_u64(&lookup, "DILEMMA_COLLAPSE_THRESHOLD")? {
            if threshold > 100 {
                return Err(invalid(
                    "DILEMMA_COLLAPSE_THRESHOLD",
                    &threshold.to_string(),
                    "must be at most 100",
                ));
            }
            config.collapse_threshold = threshold as u8;
        }
        if let Some(secs) = read_u64(&lookup, "DILEMMA_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("DILEMMA_EXPIRY_ANCHOR") {
            config.expiry_anchor = ExpiryAnchor::parse(&raw).ok_or_else(|| {
                invalid("DILEMMA_EXPIRY_ANCHOR", &raw, "expected `created` or `last-used`")
            })?;
        }

        Ok(config)
    }

    pub fn with_conversation_ttl(mut self, ttl: Duration) -> Self {
        self.conversation_ttl = ttl;
        self
    }

    /// Intervals shorter than [`MIN_SWEEP_INTERVAL`] are raised to it.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    /// Values above 100 are clamped.
    pub fn with_collapse_threshold(mut self, threshold: u8) -> Self {
        self.collapse_threshold = threshold.min(100);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_expiry_anchor(mut self, anchor: ExpiryAnchor) -> Self {
        self.expiry_anchor = anchor;
        self
    }
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<u64>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| invalid(key, &raw, &e.to_string())),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
