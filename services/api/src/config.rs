use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

/// Main configuration for the relay API
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// HTTP listener configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Object store configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Upload policy configuration
    #[serde(default)]
    pub upload: UploadConfig,
    /// AI service configuration
    #[serde(default)]
    pub inference: InferenceConfig,
    /// Token verification configuration
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (json or pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Prometheus exporter port, disabled when unset
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// API listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Which blob store backs the connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Gcs,
    Supabase,
    Memory,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend selection
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    /// Bucket name
    #[serde(default)]
    pub bucket: String,
    /// Custom Cloud Storage endpoint (emulators, MinIO)
    pub endpoint_url: Option<String>,
    /// Region passed to the S3-compatible client
    #[serde(default = "default_region")]
    pub region: String,
    /// Force path-style access
    #[serde(default)]
    pub force_path_style: bool,
    /// Supabase project URL
    pub supabase_url: Option<String>,
    /// Supabase anonymous key
    pub supabase_anon_key: Option<String>,
}

/// Upload policy
#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Maximum accepted file size in bytes (10MB default)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    /// Accepted MIME types
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
    /// Return the full storage key alongside the file id
    #[serde(default)]
    pub include_key: bool,
}

/// AI service configuration
#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    /// Base URL of the AI service
    #[serde(default = "default_ai_service_url")]
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

/// Bearer token verification
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret used by Supabase Auth to sign access tokens
    pub jwt_secret: Option<String>,
    /// Expected audience claim
    #[serde(default = "default_audience")]
    pub audience: String,
}

// Default value functions
fn default_service_name() -> String {
    "wastenot-api".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_backend() -> StorageBackend {
    StorageBackend::Gcs
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_max_file_bytes() -> usize {
    10 * 1024 * 1024 // 10MB
}

fn default_allowed_mime_types() -> Vec<String> {
    vec![
        "image/png".to_string(),
        "image/jpg".to_string(),
        "image/jpeg".to_string(),
    ]
}

fn default_ai_service_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    600
}

fn default_audience() -> String {
    "authenticated".to_string()
}

impl Config {
    /// Load configuration from config files and the environment
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "wastenot-api")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/api").required(false))
            .add_source(config::File::with_name("/etc/wastenot/api").required(false))
            // WASTENOT__STORAGE__BUCKET -> storage.bucket
            .add_source(
                config::Environment::with_prefix("WASTENOT")
                    .separator("__")
                    .try_parsing(true),
            )
            // Deployment variables shared with the rest of the stack
            .set_override_option("api.port", env_var("PORT"))?
            .set_override_option("storage.bucket", env_var("BUCKET_NAME"))?
            .set_override_option("storage.endpoint_url", env_var("STORAGE_URL"))?
            .set_override_option("storage.supabase_url", env_var("SUPABASE_URL"))?
            .set_override_option("storage.supabase_anon_key", env_var("SUPABASE_ANON_KEY"))?
            .set_override_option("inference.base_url", env_var("AI_SERVICE_URL"))?
            .set_override_option("auth.jwt_secret", env_var("SUPABASE_JWT_SECRET"))?
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Check that the selected backend has everything it needs
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.storage.backend != StorageBackend::Memory && self.storage.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "storage.bucket".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::Supabase {
            if self.storage.supabase_url.as_deref().unwrap_or_default().is_empty() {
                return Err(ConfigValidationError::MissingField(
                    "storage.supabase_url".to_string(),
                ));
            }
            if self
                .storage
                .supabase_anon_key
                .as_deref()
                .unwrap_or_default()
                .is_empty()
            {
                return Err(ConfigValidationError::MissingField(
                    "storage.supabase_anon_key".to_string(),
                ));
            }
        }

        if self.upload.max_file_bytes == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.max_file_bytes".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.upload.allowed_mime_types.is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.allowed_mime_types".to_string(),
                message: "at least one MIME type must be allowed".to_string(),
            });
        }

        if !self.inference.base_url.starts_with("http://")
            && !self.inference.base_url.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "inference.base_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            metrics_port: None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            bucket: String::new(),
            endpoint_url: None,
            region: default_region(),
            force_path_style: false,
            supabase_url: None,
            supabase_anon_key: None,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_mime_types: default_allowed_mime_types(),
            include_key: false,
        }
    }
}

impl InferenceConfig {
    /// Upper bound for one AI service request
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: default_ai_service_url(),
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            audience: default_audience(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> Config {
        Config {
            service: ServiceConfig::default(),
            api: ApiConfig::default(),
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                ..Default::default()
            },
            upload: UploadConfig::default(),
            inference: InferenceConfig::default(),
            auth: AuthConfig::default(),
        }
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_max_file_bytes(), 10 * 1024 * 1024);
        assert_eq!(default_api_port(), 3000);
        assert_eq!(default_inference_timeout_secs(), 600);
        assert_eq!(
            default_allowed_mime_types(),
            vec!["image/png", "image/jpg", "image/jpeg"]
        );
    }

    #[test]
    fn test_memory_backend_needs_no_bucket() {
        assert!(memory_config().validate().is_ok());
    }

    #[test]
    fn test_gcs_backend_requires_bucket() {
        let mut config = memory_config();
        config.storage.backend = StorageBackend::Gcs;

        match config.validate() {
            Err(ConfigValidationError::MissingField(field)) => {
                assert_eq!(field, "storage.bucket")
            }
            other => panic!("Expected missing bucket, got {:?}", other),
        }
    }

    #[test]
    fn test_supabase_backend_requires_credentials() {
        let mut config = memory_config();
        config.storage.backend = StorageBackend::Supabase;
        config.storage.bucket = "images".to_string();
        config.storage.supabase_url = Some("https://project.supabase.co".to_string());

        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(field)) if field == "storage.supabase_anon_key"
        ));

        config.storage.supabase_anon_key = Some("anon".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backend_names_deserialize() {
        let backend: StorageBackend = serde_json::from_str("\"supabase\"").unwrap();
        assert_eq!(backend, StorageBackend::Supabase);
    }

    #[test]
    fn test_inference_url_scheme() {
        let mut config = memory_config();
        config.inference.base_url = "localhost:8000".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inference_timeout() {
        let config = InferenceConfig {
            timeout_secs: 45,
            ..Default::default()
        };
        assert_eq!(config.timeout(), Duration::from_secs(45));
        assert_eq!(InferenceConfig::default().timeout(), Duration::from_secs(600));
    }
}
