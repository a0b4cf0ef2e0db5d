//! Sync types and configuration
//!
//! This module defines the settings, events, pass reports and errors of the
//! background synchronization engine.

use super::archiver::ArchiveError;
use super::network::NetworkError;
use super::quota::QuotaError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Settings for the sync engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Synced sessions are evicted oldest-first while their total exceeds this
    pub disk_budget_bytes: u64,

    /// Bytes that may be uploaded per refresh window
    pub quota_ceiling_bytes: u64,

    /// Length of the quota refresh window in seconds
    pub refresh_interval_secs: u64,

    pub locale: String,

    /// Stable device identifier; generated on first load when absent
    pub device_id: Option<String>,

    pub platform_name: String,

    /// Base URL uploads are PUT under
    pub upload_base_url: String,

    /// Where quota state is persisted; kept in memory when unset
    pub quota_state_path: Option<PathBuf>,

    /// Uploads running at once within a stage
    pub max_concurrent_uploads: usize,

    /// Extensions of files uploaded individually, smallest first
    pub video_extensions: Vec<String>,

    /// Extensions of files bundled into the telemetry archive
    pub telemetry_extensions: Vec<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            disk_budget_bytes: 2 * 1024 * 1024 * 1024, // 2 GB
            quota_ceiling_bytes: 500 * 1024 * 1024,    // 500 MB
            refresh_interval_secs: 24 * 60 * 60,
            locale: "en_US".to_string(),
            device_id: None,
            platform_name: std::env::consts::OS.to_string(),
            upload_base_url: String::new(),
            quota_state_path: None,
            max_concurrent_uploads: 4,
            video_extensions: vec!["mp4".to_string(), "mov".to_string()],
            telemetry_extensions: vec!["bin".to_string(), "json".to_string()],
        }
    }
}

impl SyncSettings {
    pub fn refresh_interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.refresh_interval_secs as i64)
    }

    /// Fill in a device id if none is configured, returning it
    pub fn ensure_device_id(&mut self) -> &str {
        self.device_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
    }

    /// Remote folder for a session: `{session}_{locale}_{device}_{platform}`
    pub fn remote_folder(&self, session_name: &str, device_id: &str) -> String {
        format!(
            "{}_{}_{}_{}",
            session_name, self.locale, device_id, self.platform_name
        )
    }

    pub fn is_video(&self, extension: &str) -> bool {
        self.video_extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }

    pub fn is_telemetry(&self, extension: &str) -> bool {
        self.telemetry_extensions
            .iter()
            .any(|ext| ext.eq_ignore_ascii_case(extension))
    }
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
}

/// Events emitted by the sync engine
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pass began
    Started,
    /// A pass completed
    Stopped,
    /// A file was uploaded to the given remote folder
    Uploaded { remote_folder: String, file: PathBuf },
}

/// What one pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub removed_dirs: usize,
    pub archives_created: usize,
    pub uploads: usize,
    /// Items left for a later pass
    pub skipped: usize,
}

impl std::ops::AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.removed_dirs += other.removed_dirs;
        self.archives_created += other.archives_created;
        self.uploads += other.uploads;
        self.skipped += other.skipped;
    }
}

/// Per-item sync errors; each one skips its item for this pass
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No files to sync in {0}")]
    NoRequestedFiles(PathBuf),

    #[error("Archive creation failed: {0}")]
    ArchiveCreationFailed(String),

    #[error("Failed to write sync marker {path}: {reason}")]
    SyncFileCreationFailed { path: PathBuf, reason: String },

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ArchiveError> for SyncError {
    fn from(err: ArchiveError) -> Self {
        SyncError::ArchiveCreationFailed(err.to_string())
    }
}
