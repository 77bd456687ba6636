use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Well-known logical pipe name shared with the peer application.
pub const DEFAULT_PIPE_NAME: &str = "BaseHeadNuendoPipe";
/// Host scope of the local machine.
pub const LOCAL_HOST: &str = ".";
/// Per-message buffer size of each pipe endpoint.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

const CONFIG_DIR_NAME: &str = "PipeBridge";
const CONFIG_FILE_NAME: &str = "bridge.json";

pub const ENV_PIPE_NAME: &str = "PIPE_BRIDGE_NAME";
pub const ENV_PIPE_HOST: &str = "PIPE_BRIDGE_HOST";
pub const ENV_PIPE_DIR: &str = "PIPE_BRIDGE_DIR";
pub const ENV_REPLY_TIMEOUT_MS: &str = "PIPE_BRIDGE_REPLY_TIMEOUT_MS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bridge settings. Every field falls back to its default when missing from the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub pipe_name: String,
    /// Machine scope of the pipe names (Windows only).
    pub pipe_host: String,
    /// Directory holding the FIFO pair (Unix only).
    pub pipe_dir: PathBuf,
    pub buffer_capacity: usize,
    pub read_timeout_ms: u64,
    pub receive_poll_ms: u64,
    pub send_idle_wait_ms: u64,
    pub send_busy_wait_ms: u64,
    pub shutdown_grace_ms: u64,
    /// How long a command waits for its result. `None` waits forever.
    pub reply_timeout_ms: Option<u64>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            pipe_name: DEFAULT_PIPE_NAME.to_string(),
            pipe_host: LOCAL_HOST.to_string(),
            pipe_dir: std::env::temp_dir(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            read_timeout_ms: 120_000,
            receive_poll_ms: 40,
            send_idle_wait_ms: 100,
            send_busy_wait_ms: 1,
            shutdown_grace_ms: 1_000,
            reply_timeout_ms: Some(120_000),
        }
    }
}

impl BridgeConfig {
    /// Load `bridge.json` from the data directory when present, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => {
                debug!("[CONFIG] No configuration file - using defaults");
                Self::default()
            }
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        info!("[CONFIG] Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup(ENV_PIPE_NAME) {
            self.pipe_name = name;
        }
        if let Some(host) = lookup(ENV_PIPE_HOST) {
            self.pipe_host = host;
        }
        if let Some(dir) = lookup(ENV_PIPE_DIR) {
            self.pipe_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_REPLY_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_REPLY_TIMEOUT_MS.to_string(),
                value: raw.clone(),
            })?;
            // 0 disables the timeout
            self.reply_timeout_ms = (millis > 0).then_some(millis);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipe_name.trim().is_empty() {
            return Err(ConfigError::Invalid("pipe_name must not be empty".into()));
        }
        if self.pipe_host.trim().is_empty() {
            return Err(ConfigError::Invalid("pipe_host must not be empty".into()));
        }
        if self.buffer_capacity < 2 {
            return Err(ConfigError::Invalid(format!(
                "buffer_capacity must hold at least one byte plus terminator, got {}",
                self.buffer_capacity
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    pub fn send_idle_wait(&self) -> Duration {
        Duration::from_millis(self.send_idle_wait_ms)
    }

    pub fn send_busy_wait(&self) -> Duration {
        Duration::from_millis(self.send_busy_wait_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }
}

/// Per-user data directory of the bridge.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(CONFIG_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Location of the optional configuration file.
pub fn config_file_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}
