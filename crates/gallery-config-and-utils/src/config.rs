//! Client configuration.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default REST API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Upper bound for a single verify/refresh/login round trip.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Lead time before access token expiry at which a refresh is attempted.
pub const DEFAULT_REFRESH_SKEW_SECS: u64 = 60;

/// Refresh attempts before a transient failure expires the session.
pub const DEFAULT_REFRESH_MAX_RETRIES: u32 = 3;

const ENV_API_URL: &str = "GALLERY_API_URL";
const ENV_LOG_LEVEL: &str = "GALLERY_LOG_LEVEL";

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// REST API base URL, e.g. `https://photos.example.com`.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Timeout applied to every auth call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Refresh this many seconds before the access token expires.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: u64,
    /// Maximum refresh attempts for transient failures.
    #[serde(default = "default_refresh_max_retries")]
    pub refresh_max_retries: u32,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_refresh_skew_secs() -> u64 {
    DEFAULT_REFRESH_SKEW_SECS
}

fn default_refresh_max_retries() -> u32 {
    DEFAULT_REFRESH_MAX_RETRIES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_skew_secs: DEFAULT_REFRESH_SKEW_SECS,
            refresh_max_retries: DEFAULT_REFRESH_MAX_RETRIES,
        }
    }
}

impl Config {
    /// Load configuration from `config.json` under `paths`, falling back to
    /// defaults, then apply `GALLERY_*` environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to `config.json` under `paths`.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override fields from environment-style lookups. Blank values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(api_url) = non_empty(ENV_API_URL) {
            self.api_url = api_url;
        }
        if let Some(log_level) = non_empty(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
    }

    /// Reject values the session layer cannot work with.
    pub fn validate(&self) -> CoreResult<()> {
        let url = self.api_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "api_url must use http or https, got {}",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.refresh_max_retries == 0 {
            return Err(CoreError::Config(
                "refresh_max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the API base URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_skew(&self) -> Duration {
        Duration::from_secs(self.refresh_skew_secs)
    }
}
