//! Client configuration at `~/.ganymede/config.toml`.
//!
//! The `[connection]` table holds the library's [`ClientConfig`]; CLI flags
//! always override file values.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ganymede_client::ClientConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connection: ClientConfig,
}

impl Config {
    /// `~/.ganymede/config.toml`, or a relative path when there is no home.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_default()
            .join(".ganymede")
            .join("config.toml")
    }

    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Apply `--server` / `--user` on top of the file values.
    pub fn with_overrides(mut self, server: Option<&str>, user: Option<&str>) -> Self {
        if let Some(server) = server {
            self.connection.server = server.to_string();
        }
        if let Some(user) = user {
            self.connection.username = user.to_string();
        }
        self
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}
