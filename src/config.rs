//! Bot configuration
//!
//! Read from `config/bot.yaml` (or the file named by `EVICT_CONFIG`), then
//! overridden from the environment. The Discord token only ever comes from
//! the environment.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE: &str = "config/bot.yaml";
pub const CONFIG_PATH_VAR: &str = "EVICT_CONFIG";
pub const TOKEN_VAR: &str = "DISCORD_TOKEN";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const PREFIX_VAR: &str = "BOT_PREFIX";

/// `database_url` value that selects the in-process ledger
pub const MEMORY_DATABASE_URL: &str = "memory://";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config file: {0}")]
    Format(#[from] serde_yaml::Error),

    #[error("{TOKEN_VAR} must be set")]
    MissingToken,
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Prefix used in guilds that have not set their own
    pub default_prefix: String,
    /// Ledger connection string; `None` runs without persistence
    pub database_url: Option<String>,
    pub max_db_connections: u32,
    /// Where pending temporary-role tasks are kept
    pub task_file: String,
    pub task_check_interval_secs: u64,
    /// How long a confirmation prompt waits for the invoker
    pub confirmation_timeout_secs: u64,
    pub embed_color: u32,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            default_prefix: ",".to_string(),
            database_url: None,
            max_db_connections: 5,
            task_file: "data/scheduled_tasks.yaml".to_string(),
            task_check_interval_secs: 30,
            confirmation_timeout_secs: 30,
            embed_color: 0x00FF_FFFF,
        }
    }
}

impl BotConfig {
    /// Load the config file and apply environment overrides
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| CONFIG_FILE.to_string());
        let mut config = Self::from_file(&path).await?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a config file, falling back to defaults when it does not exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => Self::from_yaml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// # Errors
    /// Returns an error if `content` is not a valid config document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Override fields from variables looked up through `var`
    pub fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var(DATABASE_URL_VAR).filter(|v| !v.is_empty()) {
            self.database_url = Some(url);
        }
        if let Some(prefix) = var(PREFIX_VAR).filter(|v| !v.trim().is_empty()) {
            self.default_prefix = prefix;
        }
    }

    /// # Errors
    /// Returns `MissingToken` if the variable is unset or empty.
    pub fn discord_token() -> Result<String, ConfigError> {
        std::env::var(TOKEN_VAR)
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or(ConfigError::MissingToken)
    }

    #[must_use]
    pub fn task_check_interval(&self) -> Duration {
        Duration::from_secs(self.task_check_interval_secs.max(1))
    }

    #[must_use]
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}
