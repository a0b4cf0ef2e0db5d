//! Error types and handling
//!
//! Crate-wide error aggregating the errors of every module.

use crate::clip::{ClipError, TrimError};
use crate::recorder::RecordingError;
use crate::store::StoreError;
use crate::sync::{QuotaError, SyncError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Clip error: {0}")]
    Clip(#[from] ClipError),

    #[error("Trim error: {0}")]
    Trim(#[from] TrimError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Recording(RecordingError::AlreadyRecording) => "ALREADY_RECORDING",
            AppError::Recording(RecordingError::RecorderNotReady) => "RECORDER_NOT_READY",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Clip(_) => "CLIP_ERROR",
            AppError::Trim(TrimError::SourceNotExportable(_)) => "SOURCE_NOT_EXPORTABLE",
            AppError::Trim(_) => "TRIM_ERROR",
            AppError::Store(_) => "STORE_ERROR",
            AppError::Quota(QuotaError::QuotaExceeded { .. }) => "QUOTA_EXCEEDED",
            AppError::Quota(_) => "QUOTA_ERROR",
            AppError::Sync(_) => "SYNC_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Serializable error for callers outside the crate
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<AppError> for String {
    fn from(error: AppError) -> Self {
        error.to_string()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
