//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration comes from a TOML file. A missing file is not fatal:
//! the service starts with built-in defaults and warns once logging is up.
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `SAEM_ROOT_FOLDER` environment variable
//! 3. `root_folder` in the TOML config file
//! 4. OS-dependent compiled default (fallback)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::time::millis_to_duration;
use crate::{Error, Result};

/// Environment variable overriding the root folder
pub const ENV_ROOT_FOLDER: &str = "SAEM_ROOT_FOLDER";
/// Environment variable overriding the messaging bridge URL
pub const ENV_BRIDGE_URL: &str = "SAEM_BRIDGE_URL";
/// Environment variable carrying the messaging bridge API token
pub const ENV_BRIDGE_TOKEN: &str = "SAEM_BRIDGE_TOKEN";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database, document store and session data
    pub root_folder: Option<PathBuf>,
    pub storage: StorageConfig,
    pub messaging: MessagingConfig,
    pub schedule: ScheduleConfig,
    pub phone: PhoneConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
}

/// Which repository backend to open at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Document,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// SQLite file, relative to the root folder unless absolute
    pub database_file: PathBuf,
    /// JSON document file, relative to the root folder unless absolute
    pub document_file: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_file: PathBuf::from("saem.db"),
            document_file: PathBuf::from("saem-documents.json"),
        }
    }
}

/// WhatsApp bridge connection and delivery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Base URL of the WhatsApp Web bridge
    pub bridge_url: String,
    /// Session name registered with the bridge
    pub session_name: String,
    /// Bearer token for the bridge, if it requires one
    pub api_token: Option<String>,
    /// Timeout for bridge control requests (start/status/stop)
    pub request_timeout_ms: u64,
    /// Deadline for a single message send
    pub send_timeout_ms: u64,
    /// Attempts per message for transient failures
    pub max_send_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Directory for the persisted session descriptor, relative to the root folder
    pub session_dir: PathBuf,
    /// How often `serve` polls the bridge while waiting for pairing
    pub pairing_poll_secs: u64,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:3000".to_string(),
            session_name: "saem".to_string(),
            api_token: None,
            request_timeout_ms: 30_000,
            send_timeout_ms: 20_000,
            max_send_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            session_dir: PathBuf::from("whatsapp-session"),
            pairing_poll_secs: 15,
        }
    }
}

impl MessagingConfig {
    pub fn request_timeout(&self) -> Duration {
        millis_to_duration(self.request_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        millis_to_duration(self.send_timeout_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        millis_to_duration(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        millis_to_duration(self.max_backoff_ms)
    }
}

/// Daily digest trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    /// Local hour (0-23)
    pub digest_hour: u32,
    /// Minute (0-59)
    pub digest_minute: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            digest_hour: 6,
            digest_minute: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneConfig {
    /// Country calling code prepended to bare national numbers
    pub country_prefix: String,
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self {
            country_prefix: "55".to_string(),
        }
    }
}

/// Health endpoint listener
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5790,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit path, or search the default locations.
    ///
    /// An explicit path must exist. Without one, a missing config file yields
    /// defaults. Also returns the file that was read, `None` for defaults.
    /// Nothing is logged here: callers read the config before tracing exists.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match default_config_file() {
                Some(path) => path,
                None => return Ok((Self::default(), None)),
            },
        };
        let config = Self::load(&path)?;
        Ok((config, Some(path)))
    }

    /// Apply environment overrides for messaging credentials
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_BRIDGE_URL) {
            if !url.trim().is_empty() {
                self.messaging.bridge_url = url;
            }
        }
        if let Ok(token) = std::env::var(ENV_BRIDGE_TOKEN) {
            if !token.trim().is_empty() {
                self.messaging.api_token = Some(token);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schedule.digest_hour > 23 {
            return Err(Error::Config(format!(
                "schedule.digest_hour must be 0-23, got {}",
                self.schedule.digest_hour
            )));
        }
        if self.schedule.digest_minute > 59 {
            return Err(Error::Config(format!(
                "schedule.digest_minute must be 0-59, got {}",
                self.schedule.digest_minute
            )));
        }
        if self.phone.country_prefix.is_empty()
            || !self.phone.country_prefix.chars().all(|c| c.is_ascii_digit())
        {
            return Err(Error::Config(format!(
                "phone.country_prefix must be digits only, got '{}'",
                self.phone.country_prefix
            )));
        }
        if self.messaging.max_send_attempts == 0 {
            return Err(Error::Config("messaging.max_send_attempts must be at least 1".to_string()));
        }
        if self.messaging.session_name.trim().is_empty() {
            return Err(Error::Config("messaging.session_name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// First existing config file in the platform search path
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("saem").join("config.toml"));
    let system_config = if cfg!(unix) {
        Some(PathBuf::from("/etc/saem/config.toml"))
    } else {
        None
    };

    [user_config, system_config]
        .into_iter()
        .flatten()
        .find(|path| path.exists())
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("saem"))
        .unwrap_or_else(|| PathBuf::from("./saem_data"))
}

/// Resolves the root folder from CLI, environment, TOML and defaults
#[derive(Debug, Clone, Default)]
pub struct RootFolderResolver {
    cli_arg: Option<PathBuf>,
    toml_value: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<PathBuf>, config: &TomlConfig) -> Self {
        Self {
            cli_arg,
            toml_value: config.root_folder.clone(),
        }
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        if let Ok(path) = std::env::var(ENV_ROOT_FOLDER) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_value {
            return path.clone();
        }

        default_root_folder()
    }
}

/// Creates the root folder and derives file locations inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root.exists() {
            std::fs::create_dir_all(&self.root)?;
            info!("Created root folder: {}", self.root.display());
        }
        Ok(())
    }

    pub fn database_path(&self, storage: &StorageConfig) -> PathBuf {
        self.resolve(&storage.database_file)
    }

    pub fn document_path(&self, storage: &StorageConfig) -> PathBuf {
        self.resolve(&storage.document_file)
    }

    pub fn session_dir(&self, messaging: &MessagingConfig) -> PathBuf {
        self.resolve(&messaging.session_dir)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}
