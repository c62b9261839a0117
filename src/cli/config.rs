// ABOUTME: Configuration management for the automaton application
// ABOUTME: Handles loading and merging configuration from files and environment variables

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineSettings, PARTIAL_FRACTION};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
    #[serde(default = "default_partial_fraction")]
    pub partial_fraction: f64,
    #[serde(default)]
    pub auto_save: bool,
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_poll_interval() -> Duration {
    EngineSettings::default().poll_interval
}

fn default_partial_fraction() -> f64 {
    PARTIAL_FRACTION
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            partial_fraction: default_partial_fraction(),
            auto_save: false,
            checkpoint_dir: None,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn to_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: self.poll_interval,
            partial_fraction: self.partial_fraction,
            auto_save: self.auto_save,
            checkpoint_dir: self.checkpoint_dir.clone(),
            seed: self.seed,
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let local = [
            PathBuf::from("automaton.yaml"),
            PathBuf::from(".automaton.yaml"),
        ];
        for path in local {
            if path.exists() {
                return path;
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".automaton").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        // Default path (may not exist)
        PathBuf::from("automaton.yaml")
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        if let Ok(level) = std::env::var("AUTOMATON_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("AUTOMATON_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(interval) = std::env::var("AUTOMATON_POLL_INTERVAL") {
            self.engine.poll_interval = humantime_serde::re::humantime::parse_duration(&interval)
                .with_context(|| format!("AUTOMATON_POLL_INTERVAL={}", interval))?;
        }
        if let Ok(dir) = std::env::var("AUTOMATON_CHECKPOINT_DIR") {
            self.engine.checkpoint_dir = Some(PathBuf::from(dir));
        }
        if let Ok(auto_save) = std::env::var("AUTOMATON_AUTO_SAVE") {
            self.engine.auto_save = auto_save
                .parse()
                .with_context(|| format!("AUTOMATON_AUTO_SAVE={}", auto_save))?;
        }

        Ok(())
    }
}
