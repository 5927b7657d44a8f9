use punchlist_core::{ConflictPolicyKind, RetryPolicy, StoreSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Where the offline store snapshot lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Json,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Sqlite => write!(f, "sqlite"),
            StorageBackend::Json => write!(f, "json"),
        }
    }
}

/// Server connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the punchlist API (e.g., "http://localhost:3001")
    pub api_url: Option<String>,
    /// Bearer token sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    pub timeout_secs: u64,
    /// Upload queued changes after every write command
    pub auto_sync: bool,
    /// Health check interval for `sync watch`
    pub probe_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            timeout_secs: 30,
            auto_sync: false,
            probe_interval_secs: 15,
        }
    }
}

impl ServerConfig {
    pub fn is_configured(&self) -> bool {
        self.api_url.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

/// Queue and conflict policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub max_retries: u32,
    pub coalesce_updates: bool,
    pub conflict_policy: ConflictPolicyKind,
    /// First retry delay; 0 disables backoff
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        let store = StoreSettings::default();
        let retry = RetryPolicy::default();
        Self {
            max_retries: store.max_retries,
            coalesce_updates: store.coalesce_updates,
            conflict_policy: ConflictPolicyKind::default(),
            backoff_base_ms: retry.base_delay.as_millis() as u64,
            backoff_max_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl SyncSettings {
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            max_retries: self.max_retries,
            coalesce_updates: self.coalesce_updates,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.backoff_base_ms == 0 {
            return RetryPolicy::immediate();
        }
        RetryPolicy {
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms.max(self.backoff_base_ms)),
            jitter: true,
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the local store (SQLite database or JSON file)
    pub database_path: ConfigValue<PathBuf>,
    /// User id recorded on new items and photos
    pub created_by: ConfigValue<String>,
    pub storage: ConfigValue<StorageBackend>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub server: ServerConfig,
    pub sync: SyncSettings,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    created_by: Option<String>,
    storage: Option<StorageBackend>,
    server: Option<ServerConfig>,
    sync: Option<SyncSettings>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut database_path =
            ConfigValue::new(Self::default_data_dir().join("punch.db"), ConfigSource::Default);
        let mut created_by = ConfigValue::new("default".to_string(), ConfigSource::Default);
        let mut storage = ConfigValue::new(StorageBackend::default(), ConfigSource::Default);
        let mut config_file = None;
        let mut server = ServerConfig::default();
        let mut sync = SyncSettings::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(db_path) = file_config.database_path {
                // Relative paths are relative to the config file
                let resolved_path = if db_path.is_relative() {
                    path.parent().map(|p| p.join(&db_path)).unwrap_or(db_path)
                } else {
                    db_path
                };
                database_path = ConfigValue::new(resolved_path, ConfigSource::File);
            }
            if let Some(user) = file_config.created_by {
                created_by = ConfigValue::new(user, ConfigSource::File);
            }
            if let Some(backend) = file_config.storage {
                storage = ConfigValue::new(backend, ConfigSource::File);
            }
            if let Some(server_config) = file_config.server {
                server = server_config;
            }
            if let Some(sync_settings) = file_config.sync {
                sync = sync_settings;
            }
        }

        if let Ok(db_path) = std::env::var("PUNCH_DATABASE_PATH") {
            database_path = ConfigValue::new(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Ok(user) = std::env::var("PUNCH_CREATED_BY") {
            created_by = ConfigValue::new(user, ConfigSource::Environment);
        }
        if let Ok(url) = std::env::var("PUNCH_API_URL") {
            server.api_url = Some(url);
        }
        if let Ok(token) = std::env::var("PUNCH_API_TOKEN") {
            server.api_token = Some(token);
        }

        Ok(Self {
            database_path,
            created_by,
            storage,
            config_file,
            server,
            sync,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/punch/
    /// - macOS: ~/Library/Application Support/punch/
    /// - Windows: %APPDATA%/punch/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("punch")
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("punch")
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
