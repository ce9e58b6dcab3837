// ABOUTME: Configuration management for the netsched application
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{ExecutionStrategy, SchedulerConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub strategy: ExecutionStrategy,
    pub poll_interval_ms: u64,
    pub max_concurrent: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Dynamic,
            poll_interval_ms: 10,
            max_concurrent: None,
            timeout_secs: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl SchedulerSettings {
    pub fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            strategy: self.strategy,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_concurrent: self.max_concurrent,
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file()?,
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&contents)?
        } else {
            Config::default()
        };

        // Merge with environment variables
        config.merge_env()?;

        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Result<PathBuf> {
        let possible_paths = vec![
            PathBuf::from("netsched.yaml"),
            PathBuf::from("netsched.yml"),
            PathBuf::from(".netsched.yaml"),
            PathBuf::from(".netsched.yml"),
        ];

        // Check current directory
        for path in possible_paths {
            if path.exists() {
                return Ok(path);
            }
        }

        // Check home directory
        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".netsched").join("config.yaml");
            if home_config.exists() {
                return Ok(home_config);
            }
        }

        // Return default path (may not exist)
        Ok(PathBuf::from("netsched.yaml"))
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        // Logging configuration
        if let Ok(level) = std::env::var("NETSCHED_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("NETSCHED_LOG_FORMAT") {
            self.logging.format = format;
        }

        // Scheduler configuration
        if let Ok(strategy) = std::env::var("NETSCHED_STRATEGY") {
            self.scheduler.strategy = strategy.parse()?;
        }
        if let Ok(max_concurrent) = std::env::var("NETSCHED_MAX_CONCURRENT") {
            self.scheduler.max_concurrent = Some(max_concurrent.parse()?);
        }
        if let Ok(poll_interval) = std::env::var("NETSCHED_POLL_INTERVAL_MS") {
            self.scheduler.poll_interval_ms = poll_interval.parse()?;
        }

        Ok(())
    }
}
