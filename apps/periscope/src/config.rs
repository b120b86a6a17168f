use std::collections::HashMap;
use std::time::Duration;

use periscope_session::config::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_CAP_DELAY_MS, DEFAULT_GATHERING_TIMEOUT_MS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_STUN_SERVER,
};
use periscope_session::{RetryPolicy, SessionConfig};
use serde::Deserialize;
use url::Url;

const ENV_PREFIX: &str = "PERISCOPE";
const LEGACY_TOTAL_CAMERAS: &str = "TOTAL_CAMERAS";

/// Value of `ice_servers` that means "no ICE servers at all".
pub const NO_ICE_SERVERS: &str = "none";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("TOTAL_CAMERAS must be a non-negative integer, got {0:?}")]
    LegacyTotal(String),
    #[error("invalid signaling url {url:?}: {source}")]
    SignalingUrl {
        url: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_signaling_url")]
    pub signaling_url: String,
    #[serde(default = "default_total_cameras")]
    pub total_cameras: u32,
    #[serde(default = "default_source_prefix")]
    pub source_prefix: String,
    /// Comma-separated source ids; wins over `total_cameras`.
    #[serde(default)]
    pub sources: Option<String>,
    /// Comma-separated STUN/TURN urls, or `none`.
    #[serde(default)]
    pub ice_servers: Option<String>,
    #[serde(default = "default_gathering_timeout_ms")]
    pub gathering_timeout_ms: u64,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_cap_delay_ms")]
    pub retry_cap_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_summary_interval_secs")]
    pub summary_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            signaling_url: default_signaling_url(),
            total_cameras: default_total_cameras(),
            source_prefix: default_source_prefix(),
            sources: None,
            ice_servers: None,
            gathering_timeout_ms: default_gathering_timeout_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_cap_delay_ms: default_retry_cap_delay_ms(),
            max_attempts: default_max_attempts(),
            request_timeout_ms: default_request_timeout_ms(),
            summary_interval_secs: default_summary_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Reads `PERISCOPE_*` variables, falling back to the legacy
    /// `TOTAL_CAMERAS` for the camera count.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None, std::env::var(LEGACY_TOTAL_CAMERAS).ok())
    }

    fn load(
        vars: Option<HashMap<String, String>>,
        legacy_total: Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(total) = Self::normalize_opt(legacy_total) {
            let parsed: u32 = total
                .parse()
                .map_err(|_| ConfigError::LegacyTotal(total.clone()))?;
            builder = builder.set_default("total_cameras", i64::from(parsed))?;
        }
        let loaded: AppConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?
            .try_deserialize()?;
        Ok(loaded.normalize())
    }

    fn normalize(mut self) -> Self {
        self.signaling_url = Self::normalize_opt(Some(self.signaling_url))
            .unwrap_or_else(default_signaling_url);
        self.source_prefix = Self::normalize_opt(Some(self.source_prefix))
            .unwrap_or_else(default_source_prefix);
        self.sources = Self::normalize_opt(self.sources.take());
        self.ice_servers = Self::normalize_opt(self.ice_servers.take());
        self
    }

    fn normalize_opt(value: Option<String>) -> Option<String> {
        value.and_then(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    pub fn source_ids(&self) -> Vec<String> {
        if let Some(sources) = &self.sources {
            return split_list(sources);
        }
        (1..=self.total_cameras)
            .map(|index| format!("{}{index}", self.source_prefix))
            .collect()
    }

    pub fn ice_server_urls(&self) -> Vec<String> {
        match self.ice_servers.as_deref() {
            None => vec![DEFAULT_STUN_SERVER.to_string()],
            Some(value) if value.eq_ignore_ascii_case(NO_ICE_SERVERS) => Vec::new(),
            Some(value) => split_list(value),
        }
    }

    pub fn signaling_base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.signaling_url).map_err(|source| ConfigError::SignalingUrl {
            url: self.signaling_url.clone(),
            source,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: self.retry_base_delay_ms,
            cap_delay_ms: self.retry_cap_delay_ms,
            max_attempts: self.max_attempts,
        }
    }

    pub fn session_config(&self, source_id: &str) -> SessionConfig {
        SessionConfig::new(source_id)
            .with_ice_servers(self.ice_server_urls())
            .with_gathering_timeout(Duration::from_millis(self.gathering_timeout_ms))
            .with_retry(self.retry_policy())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_signaling_url() -> String {
    "http://localhost:1984".to_string()
}

fn default_total_cameras() -> u32 {
    16
}

fn default_source_prefix() -> String {
    "cam".to_string()
}

fn default_gathering_timeout_ms() -> u64 {
    DEFAULT_GATHERING_TIMEOUT_MS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

fn default_retry_cap_delay_ms() -> u64 {
    DEFAULT_CAP_DELAY_MS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_summary_interval_secs() -> u64 {
    30
}
