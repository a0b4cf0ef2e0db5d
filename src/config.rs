//! Application configuration
//!
//! Loaded from a JSON file, then overridden by `CLIPVAULT_*` environment
//! variables. Every field has a default so a partial file is valid.

use crate::recorder::RecordingSettings;
use crate::sync::SyncSettings;
use crate::utils::error::{AppError, AppResult};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_ROOT: &str = "CLIPVAULT_ROOT";
pub const ENV_DEVICE_ID: &str = "CLIPVAULT_DEVICE_ID";
pub const ENV_UPLOAD_URL: &str = "CLIPVAULT_UPLOAD_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Directory holding one subdirectory per recording session
    pub recordings_root: PathBuf,
    pub recording: RecordingSettings,
    pub sync: SyncSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recordings_root: std::env::temp_dir().join("clipvault").join("recordings"),
            recording: RecordingSettings::default(),
            sync: SyncSettings::default(),
        }
    }
}

impl Config {
    /// Read a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Apply environment overrides and fill in a device id
    pub fn apply_env(mut self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok());
        self
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(root) = var(ENV_ROOT) {
            self.recordings_root = PathBuf::from(root);
        }
        if let Some(device_id) = var(ENV_DEVICE_ID) {
            self.sync.device_id = Some(device_id);
        }
        if let Some(url) = var(ENV_UPLOAD_URL) {
            self.sync.upload_base_url = url;
        }
        self.sync.ensure_device_id();
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.recording.chunk_limit == 0 {
            return Err(AppError::Config("chunkLimit must be at least 1".to_string()));
        }
        if self.recording.extension.is_empty() {
            return Err(AppError::Config("extension must not be empty".to_string()));
        }
        if self.sync.quota_ceiling_bytes == 0 {
            return Err(AppError::Config(
                "quotaCeilingBytes must be greater than 0".to_string(),
            ));
        }
        if self.sync.refresh_interval_secs == 0 {
            return Err(AppError::Config(
                "refreshIntervalSecs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
