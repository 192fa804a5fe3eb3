use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};
use crate::transform::CastPolicy;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Store credentials used when a request carries only a token, plus the HTTP timeout.
/// Host, port and database always come from the request.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_username() -> String {
    "default".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            username: default_username(),
            password: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub cast_policy: CastPolicy,
    /// Reject transforms whose filters name an unknown operator instead of ignoring those filters.
    #[serde(default)]
    pub strict_filters: bool,
    #[serde(default)]
    pub production: bool,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_batch_size() -> usize {
    crate::query::DEFAULT_BATCH_SIZE
}

fn default_preview_limit() -> usize {
    100
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            batch_size: default_batch_size(),
            preview_limit: default_preview_limit(),
            max_file_size: default_max_file_size(),
            cast_policy: CastPolicy::default(),
            strict_filters: false,
            production: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_block_symlinks")]
    pub block_symlinks: bool,
    /// Limit `executeQuery` to single read and DML statements.
    #[serde(default)]
    pub restrict_queries: bool,
}

fn default_block_symlinks() -> bool {
    true
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            block_symlinks: true,
            restrict_queries: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn env_flag(val: &str) -> bool {
    val == "true" || val == "1"
}

fn env_number<T: std::str::FromStr>(name: &str, val: &str) -> Result<T> {
    val.parse()
        .map_err(|_| Error::Validation(format!("{} must be a number, got '{}'", name, val)))
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let contents = std::fs::read_to_string(p)
                    .map_err(|e| Error::Validation(format!("Cannot read config file: {}", e)))?;
                toml::from_str(&contents)
                    .map_err(|e| Error::Validation(format!("Invalid config file: {}", e)))?
            }
            None => Config::default(),
        };

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("CLICKHOUSE_USER") {
            self.store.username = val;
        }
        if let Ok(val) = std::env::var("CLICKHOUSE_PASSWORD") {
            self.store.password = val;
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_DB_TIMEOUT") {
            self.store.request_timeout_secs = env_number("FLATBRIDGE_DB_TIMEOUT", &val)?;
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_UPLOAD_DIR") {
            self.transfer.upload_dir = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_BATCH_SIZE") {
            self.transfer.batch_size = env_number("FLATBRIDGE_BATCH_SIZE", &val)?;
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_MAX_FILE_SIZE") {
            self.transfer.max_file_size = env_number("FLATBRIDGE_MAX_FILE_SIZE", &val)?;
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_PRODUCTION") {
            self.transfer.production = env_flag(&val);
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_STRICT_FILTERS") {
            self.transfer.strict_filters = env_flag(&val);
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_BLOCK_SYMLINKS") {
            self.security.block_symlinks = env_flag(&val);
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_RESTRICT_QUERIES") {
            self.security.restrict_queries = env_flag(&val);
        }
        if let Ok(val) = std::env::var("FLATBRIDGE_LOG_FORMAT") {
            self.logging.format = match val.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.transfer.batch_size == 0 {
            return Err(Error::Validation("transfer.batch_size must be at least 1".into()));
        }
        if self.transfer.preview_limit == 0 {
            return Err(Error::Validation("transfer.preview_limit must be at least 1".into()));
        }
        if !self.transfer.upload_dir.exists() {
            warn!(
                "Upload directory does not exist yet, it will be created on first export: {:?}",
                self.transfer.upload_dir
            );
        }
        Ok(())
    }
}
