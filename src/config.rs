//! Application configuration
//!
//! Stored as JSON in `~/.bigfile-uploader/config.json`. Every field has a
//! default, so a partial file (or no file at all) is valid.

use crate::uploader::{DEFAULT_CHUNK_SIZE, DEFAULT_EVENT_CAPACITY, DEFAULT_HASH_SLICE_SIZE, UploaderConfig};
use anyhow::{Context, Result, bail};
use bigfile_api::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".bigfile-uploader";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the upload service
    pub server_url: String,
    pub request_timeout_secs: u64,
    /// Timeout for a single chunk request
    pub upload_timeout_secs: u64,
    pub access_token: Option<String>,
    pub chunk_size: u64,
    pub hash_slice_size: usize,
    pub event_capacity: usize,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_max_files: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3007/".to_string(),
            request_timeout_secs: 60,
            upload_timeout_secs: 300,
            access_token: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash_slice_size: DEFAULT_HASH_SLICE_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            log_level: "info".to_string(),
            log_to_file: false,
            log_max_files: 5,
        }
    }
}

impl AppConfig {
    /// `~/.bigfile-uploader`
    pub fn config_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to get user home directory")?;
        Ok(home_dir.join(CONFIG_DIR))
    }

    pub fn log_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
            .join("logs")
    }

    /// Load the default config file, falling back to defaults if it does not exist
    pub fn load_default() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(target: "config", path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;

        tracing::debug!(target: "config", path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be greater than zero");
        }
        if self.hash_slice_size == 0 {
            bail!("hash_slice_size must be greater than zero");
        }
        if self.event_capacity == 0 {
            bail!("event_capacity must be greater than zero");
        }
        if self.server_url.trim().is_empty() {
            bail!("server_url must not be empty");
        }
        Ok(())
    }

    pub fn uploader_config(&self) -> UploaderConfig {
        UploaderConfig {
            chunk_size: self.chunk_size,
            hash_slice_size: self.hash_slice_size,
            event_capacity: self.event_capacity,
            auto_start: false,
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let config = ClientConfig::new(self.server_url.clone())
            .with_timeout(Duration::from_secs(self.request_timeout_secs))
            .with_upload_timeout(Duration::from_secs(self.upload_timeout_secs));
        match &self.access_token {
            Some(token) if !token.is_empty() => config.with_access_token(token.clone()),
            _ => config,
        }
    }
}
