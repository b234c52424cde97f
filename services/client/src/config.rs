//! Client configuration.
//!
//! The API base URL and per-operation retry policies. Values are layered from
//! defaults, an optional `config/client` file, `WASTENOT_CLIENT__*`
//! variables and finally `EXPO_PUBLIC_API_URL`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to load configuration: {0}")]
    LoadError(String),
}

/// Bounded-retry policy for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed delay between failed attempts
    pub retry_delay_ms: u64,
    /// Upper bound for a single attempt
    pub attempt_timeout_secs: u64,
}

impl RetryConfig {
    /// Ingredient detection: 3 attempts, one minute apart, ten minutes each
    pub fn detection() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 60_000,
            attempt_timeout_secs: 600,
        }
    }

    /// Recipe generation: a single two-minute attempt
    pub fn generation() -> Self {
        Self {
            max_attempts: 1,
            retry_delay_ms: 0,
            attempt_timeout_secs: 120,
        }
    }

    /// Plain image upload: a single two-minute attempt
    pub fn upload() -> Self {
        Self::generation()
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    fn validate(&self, key: &str) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{key}.max_attempts"),
                message: "must be at least 1".to_string(),
            });
        }

        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{key}.attempt_timeout_secs"),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// WasteNot API client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL every relative endpoint is joined onto
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Bearer token sent with upload and detection requests
    #[serde(default)]
    pub access_token: Option<String>,
    /// Log level for the command line front-end
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "RetryConfig::detection")]
    pub detection: RetryConfig,
    #[serde(default = "RetryConfig::generation")]
    pub generation: RetryConfig,
    #[serde(default = "RetryConfig::upload")]
    pub upload: RetryConfig,
}

fn default_api_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            access_token: None,
            log_level: default_log_level(),
            detection: RetryConfig::detection(),
            generation: RetryConfig::generation(),
            upload: RetryConfig::upload(),
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at `api_url` with default policies
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ..Default::default()
        }
    }

    /// Load configuration from config files and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let api_url = std::env::var("EXPO_PUBLIC_API_URL")
            .ok()
            .filter(|url| !url.is_empty());

        config::Config::builder()
            .add_source(config::File::with_name("config/client").required(false))
            // WASTENOT_CLIENT__DETECTION__MAX_ATTEMPTS -> detection.max_attempts
            .add_source(
                config::Environment::with_prefix("WASTENOT_CLIENT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("api_url", api_url)
            .and_then(|builder| builder.build())
            .and_then(|config| config.try_deserialize())
            .map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_url.is_empty() {
            return Err(ConfigError::MissingRequired("api_url".to_string()));
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                key: "api_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        self.detection.validate("detection")?;
        self.generation.validate("generation")?;
        self.upload.validate("upload")?;

        Ok(())
    }
}
