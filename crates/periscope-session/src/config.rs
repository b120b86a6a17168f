use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SessionError, SessionResult};

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DEFAULT_GATHERING_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_CAP_DELAY_MS: u64 = 10_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Capped exponential backoff between negotiation attempts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_cap_delay_ms")]
    pub cap_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            cap_delay_ms: DEFAULT_CAP_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `attempt` (1-based) failed:
    /// `min(base * 2^(attempt - 1), cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.cap_delay_ms);
        Duration::from_millis(millis)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.max_attempts == 0 {
            return Err(SessionError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.base_delay_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "base_delay_ms must be greater than zero".into(),
            ));
        }
        if self.cap_delay_ms < self.base_delay_ms {
            return Err(SessionError::InvalidConfig(format!(
                "cap_delay_ms ({}) must not be below base_delay_ms ({})",
                self.cap_delay_ms, self.base_delay_ms
            )));
        }
        Ok(())
    }
}

/// Everything one logical connection needs. Frozen once the attempt loop
/// starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub source_id: String,
    #[serde(default = "default_ice_servers")]
    pub ice_servers: Vec<String>,
    #[serde(default = "default_gathering_timeout_ms")]
    pub gathering_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl SessionConfig {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ice_servers: default_ice_servers(),
            gathering_timeout_ms: DEFAULT_GATHERING_TIMEOUT_MS,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ice_servers<I, S>(mut self, servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ice_servers = servers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_gathering_timeout(mut self, timeout: Duration) -> Self {
        self.gathering_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.source_id.trim().is_empty() {
            return Err(SessionError::InvalidConfig(
                "source id must not be empty".into(),
            ));
        }
        if self.gathering_timeout_ms == 0 {
            return Err(SessionError::InvalidConfig(
                "gathering timeout must be greater than zero".into(),
            ));
        }
        self.retry.validate()
    }
}

fn default_ice_servers() -> Vec<String> {
    vec![DEFAULT_STUN_SERVER.to_string()]
}

fn default_gathering_timeout_ms() -> u64 {
    DEFAULT_GATHERING_TIMEOUT_MS
}

fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_cap_delay_ms() -> u64 {
    DEFAULT_CAP_DELAY_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
