//! Loading and validating `sandpool.toml`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pool::{PoolSettings, TimeoutPolicy};

const CONFIG_FILE: &str = "sandpool.toml";

/// Top-level `sandpool.toml` configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pool size, timeouts and policies
    #[serde(default)]
    pub pool: PoolConfig,

    /// Language tag -> execution image and invocation
    #[serde(default = "default_languages")]
    pub languages: BTreeMap<String, LanguageConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            languages: default_languages(),
        }
    }
}

/// Pool sizing and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Sandboxes started per language at boot
    #[serde(default = "default_count")]
    pub count_per_language: usize,

    /// How long a caller waits for an idle sandbox
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// How long a single execution may run
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_secs: u64,

    /// Grace given to a sandbox's process on stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Budget for one forced removal; also the per-sandbox teardown increment
    #[serde(default = "default_cleanup_timeout")]
    pub cleanup_timeout_secs: u64,

    /// Fixed part of the aggregate teardown deadline
    #[serde(default = "default_cleanup_base")]
    pub cleanup_base_secs: u64,

    /// What happens to a sandbox whose execution timed out
    #[serde(default)]
    pub timeout_policy: TimeoutPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            count_per_language: default_count(),
            acquire_timeout_secs: default_acquire_timeout(),
            exec_timeout_secs: default_exec_timeout(),
            stop_timeout_secs: default_stop_timeout(),
            cleanup_timeout_secs: default_cleanup_timeout(),
            cleanup_base_secs: default_cleanup_base(),
            timeout_policy: TimeoutPolicy::default(),
        }
    }
}

impl PoolConfig {
    /// Converts the file representation into pool settings.
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            exec_timeout: Duration::from_secs(self.exec_timeout_secs),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            cleanup_timeout: Duration::from_secs(self.cleanup_timeout_secs),
            cleanup_base: Duration::from_secs(self.cleanup_base_secs),
            timeout_policy: self.timeout_policy,
            ..PoolSettings::default()
        }
    }
}

/// One language's execution environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    /// Image sandboxes for this language are created from
    pub image: String,

    /// Interpreter invocation; the submitted code is appended as the last argument
    /// - Python: "python -c"
    /// - JavaScript: "node -e"
    pub command: String,
}

// Default value functions
fn default_count() -> usize {
    2
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_exec_timeout() -> u64 {
    10
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_cleanup_timeout() -> u64 {
    10
}

fn default_cleanup_base() -> u64 {
    5
}

fn default_languages() -> BTreeMap<String, LanguageConfig> {
    BTreeMap::from([
        (
            "python".to_string(),
            LanguageConfig {
                image: "docker.io/library/python:3.11-slim".to_string(),
                command: "python -c".to_string(),
            },
        ),
        (
            "javascript".to_string(),
            LanguageConfig {
                image: "docker.io/library/node:20-slim".to_string(),
                command: "node -e".to_string(),
            },
        ),
    ])
}

impl Config {
    /// Load configuration from `project_dir`, then the user config dir,
    /// using defaults if neither has a config file
    pub fn load(project_dir: &Path) -> Result<Self> {
        let local = project_dir.join(CONFIG_FILE);
        if local.exists() {
            return Self::load_from(&local);
        }

        if let Some(global) = user_config_path() {
            if global.exists() {
                return Self::load_from(&global);
            }
        }

        Ok(Self::default())
    }

    /// Load and validate configuration from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        Ok(config)
    }

    /// Reject configurations the pool cannot start from
    pub fn validate(&self) -> Result<()> {
        if self.languages.is_empty() {
            bail!("no languages configured");
        }
        if self.pool.count_per_language == 0 {
            bail!("pool.count_per_language must be at least 1");
        }
        if self.pool.exec_timeout_secs == 0 || self.pool.acquire_timeout_secs == 0 {
            bail!("pool timeouts must be at least 1 second");
        }
        for (name, language) in &self.languages {
            if language.image.trim().is_empty() {
                bail!("language '{name}' has an empty image");
            }
            if language.command.trim().is_empty() {
                bail!("language '{name}' has an empty command");
            }
        }
        Ok(())
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("sandpool").join(CONFIG_FILE))
}
