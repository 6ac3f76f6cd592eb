use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::playback::ranges::DEFAULT_CHUNK_SIZE;
use crate::playback::resource::DEFAULT_SCHEME;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClientConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: u64,

    #[serde(default = "default_progress_fallback")]
    pub progress_fallback_secs: u64,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    #[serde(default = "default_resource_scheme")]
    pub resource_scheme: String,
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_progress_fallback() -> u64 {
    3
}

fn default_log_filter() -> String {
    "witness=debug".to_string()
}

fn default_resource_scheme() -> String {
    DEFAULT_SCHEME.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: default_chunk_size(),
            progress_fallback_secs: default_progress_fallback(),
            log_filter: default_log_filter(),
            resource_scheme: default_resource_scheme(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from `path`, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {:?}", path))?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("chunk_size_bytes must be greater than zero"));
        }

        if self.resource_scheme.is_empty() {
            return Err(anyhow::anyhow!("resource_scheme cannot be empty"));
        }

        if !self
            .resource_scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Err(anyhow::anyhow!(
                "resource_scheme may only contain letters, digits, '+', '-' and '.'"
            ));
        }

        Ok(())
    }

    pub fn progress_fallback(&self) -> Duration {
        Duration::from_secs(self.progress_fallback_secs)
    }
}
