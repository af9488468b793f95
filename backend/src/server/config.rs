use chrono::TimeDelta;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::alerting::failure_tracker::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_SUPPRESSION_MINUTES, SuppressionPolicy,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML from config file at {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("Failed to load config from environment: {0}")]
    Env(#[from] envy::Error),
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{0} must be greater than zero")]
    NotPositive(&'static str),
    #[error("{name} must be at most {max}")]
    TooLarge { name: &'static str, max: i64 },
}

/// Upper bound for `suppression_minutes`: one year.
pub const MAX_SUPPRESSION_MINUTES: i64 = 366 * 24 * 60;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub telegram_bot_token: String,

    #[serde(default = "default_telegram_api_url")]
    pub telegram_api_url: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    #[serde(default = "default_check_interval_seconds")]
    pub check_interval_seconds: u64,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u64,

    #[serde(default = "default_suppression_minutes")]
    pub suppression_minutes: i64,

    #[serde(default = "default_request_timeout_ceiling_seconds")]
    pub request_timeout_ceiling_seconds: u64,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    telegram_bot_token: Option<String>,
    telegram_api_url: Option<String>,
    log_dir: Option<String>,
    check_interval_seconds: Option<u64>,
    failure_threshold: Option<u64>,
    suppression_minutes: Option<i64>,
    request_timeout_ceiling_seconds: Option<u64>,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_check_interval_seconds() -> u64 {
    5
}

fn default_failure_threshold() -> u64 {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_suppression_minutes() -> i64 {
    DEFAULT_SUPPRESSION_MINUTES
}

fn default_request_timeout_ceiling_seconds() -> u64 {
    300
}

impl ServerConfig {
    /// Loads the config file (if given and present), then lets environment
    /// variables override it field by field.
    pub fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let file_config = match config_path {
            Some(path) => read_file(Path::new(path))?,
            None => PartialServerConfig::default(),
        };
        let env_config = envy::from_env::<PartialServerConfig>()?;
        Self::merge(env_config, file_config)
    }

    fn merge(
        env_config: PartialServerConfig,
        file_config: PartialServerConfig,
    ) -> Result<Self, ConfigError> {
        let config = ServerConfig {
            database_url: env_config
                .database_url
                .or(file_config.database_url)
                .ok_or(ConfigError::Missing("DATABASE_URL"))?,
            telegram_bot_token: env_config
                .telegram_bot_token
                .or(file_config.telegram_bot_token)
                .ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?,
            telegram_api_url: env_config
                .telegram_api_url
                .or(file_config.telegram_api_url)
                .unwrap_or_else(default_telegram_api_url),
            log_dir: env_config
                .log_dir
                .or(file_config.log_dir)
                .unwrap_or_else(default_log_dir),
            check_interval_seconds: env_config
                .check_interval_seconds
                .or(file_config.check_interval_seconds)
                .unwrap_or_else(default_check_interval_seconds),
            failure_threshold: env_config
                .failure_threshold
                .or(file_config.failure_threshold)
                .unwrap_or_else(default_failure_threshold),
            suppression_minutes: env_config
                .suppression_minutes
                .or(file_config.suppression_minutes)
                .unwrap_or_else(default_suppression_minutes),
            request_timeout_ceiling_seconds: env_config
                .request_timeout_ceiling_seconds
                .or(file_config.request_timeout_ceiling_seconds)
                .unwrap_or_else(default_request_timeout_ceiling_seconds),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.check_interval_seconds == 0 {
            return Err(ConfigError::NotPositive("CHECK_INTERVAL_SECONDS"));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::NotPositive("FAILURE_THRESHOLD"));
        }
        if self.suppression_minutes <= 0 {
            return Err(ConfigError::NotPositive("SUPPRESSION_MINUTES"));
        }
        if self.suppression_minutes > MAX_SUPPRESSION_MINUTES
            || TimeDelta::try_minutes(self.suppression_minutes).is_none()
        {
            return Err(ConfigError::TooLarge {
                name: "SUPPRESSION_MINUTES",
                max: MAX_SUPPRESSION_MINUTES,
            });
        }
        if self.request_timeout_ceiling_seconds == 0 {
            return Err(ConfigError::NotPositive("REQUEST_TIMEOUT_CEILING_SECONDS"));
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn request_timeout_ceiling(&self) -> Duration {
        Duration::from_secs(self.request_timeout_ceiling_seconds)
    }

    pub fn suppression_policy(&self) -> SuppressionPolicy {
        SuppressionPolicy {
            failure_threshold: self.failure_threshold,
            // Bounded by `validate`; the policy clamps anything past the calendar.
            suppression_window: TimeDelta::try_minutes(self.suppression_minutes)
                .unwrap_or(TimeDelta::MAX),
        }
    }
}

fn read_file(path: &Path) -> Result<PartialServerConfig, ConfigError> {
    if !path.exists() {
        return Ok(PartialServerConfig::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
