use secrecy::SecretString;
use std::time::Duration;
use tracing::Level;
use vatel_api::{ApiConfig, DEFAULT_API_BASE, DEFAULT_REQUEST_TIMEOUT};
use vatel_realtime::ConnectConfig;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Only needed by commands that call the API; see [`Config::api_config`].
    pub api_key: Option<SecretString>,
    pub base_url: String,
    /// Session channel base; derived from `base_url` when unset.
    pub ws_url: Option<String>,
    pub agent_id: Option<String>,
    pub log_level: Level,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("VATEL_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        let base_url =
            std::env::var("VATEL_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        let ws_url = std::env::var("VATEL_WS_URL").ok();
        let agent_id = std::env::var("VATEL_AGENT_ID").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let connect_timeout = secs_var("VATEL_CONNECT_TIMEOUT_SECS", 10)?;
        let close_timeout = secs_var("VATEL_CLOSE_TIMEOUT_SECS", 5)?;

        Ok(Self {
            api_key,
            base_url,
            ws_url,
            agent_id,
            log_level,
            connect_timeout,
            close_timeout,
        })
    }

    /// REST client settings. Fails if no API key is configured.
    pub fn api_config(&self) -> Result<ApiConfig, ConfigError> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| ConfigError::MissingVar("VATEL_API_KEY".to_string()))?;
        Ok(ApiConfig {
            api_key,
            base_url: self.base_url.clone(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn connect_config(&self) -> ConnectConfig {
        let base = self.ws_url.clone().unwrap_or_else(|| self.base_url.clone());
        ConnectConfig {
            open_timeout: self.connect_timeout,
            close_timeout: self.close_timeout,
            ..ConnectConfig::new(base)
        }
    }
}

fn secs_var(name: &str, default: u64) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
