//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::application::commands::CommandSettings;
use crate::application::errors::ConfigError;

/// Runtime configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub bot: BotConfig,
    pub modules: ModulesConfig,
    pub commands: CommandsConfig,
    pub cron: CronConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BotConfig {
    pub name: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: "guildkit".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModulesConfig {
    /// Scan root, one module per subdirectory
    pub directory: PathBuf,
    /// Where shadow copies of module libraries are placed
    pub shadow_directory: PathBuf,
    pub auto_load: bool,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./modules"),
            shadow_directory: std::env::temp_dir().join("guildkit-shadow"),
            auto_load: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CommandsConfig {
    /// Deploy commands to this guild only instead of globally
    pub dev_guild_id: Option<String>,
    pub auto_deploy: bool,
    pub error_message: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            dev_guild_id: None,
            auto_deploy: true,
            error_message: CommandSettings::default().error_message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CronConfig {
    pub check_interval_seconds: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 60,
        }
    }
}

impl Config {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse(format!("Failed to parse config: {}", e)))
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_yaml::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Defaults plus environment overrides
    pub fn load_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `DEV_GUILD_ID`, `MODULES_DIR` and `CRON_INTERVAL_SECONDS` from `lookup`.
    ///
    /// All or nothing: on error `self` is left as it was.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut updated = self.clone();

        if let Some(guild_id) = lookup("DEV_GUILD_ID").filter(|v| !v.trim().is_empty()) {
            updated.commands.dev_guild_id = Some(guild_id);
        }

        if let Some(dir) = lookup("MODULES_DIR") {
            updated.modules.directory = PathBuf::from(dir);
        }

        if let Some(interval) = lookup("CRON_INTERVAL_SECONDS") {
            updated.cron.check_interval_seconds = interval
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("CRON_INTERVAL_SECONDS={}", interval)))?;
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cron.check_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "cron.check-interval-seconds must be positive".to_string(),
            ));
        }
        if self.commands.error_message.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "commands.error-message must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cron_interval(&self) -> Duration {
        Duration::from_secs(self.cron.check_interval_seconds)
    }

    pub fn command_settings(&self) -> CommandSettings {
        CommandSettings {
            dev_guild_id: self.commands.dev_guild_id.clone(),
            auto_deploy: self.commands.auto_deploy,
            error_message: self.commands.error_message.clone(),
            ..CommandSettings::default()
        }
    }
}
