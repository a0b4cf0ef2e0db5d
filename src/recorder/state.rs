//! Recording state management
//!
//! Defines the recorder state machine, recording settings and the chunk
//! bookkeeping shared with clip extraction.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingState {
    /// No recording in progress
    #[default]
    Idle,
    /// Currently recording
    Recording,
    /// Final chunk cut and pending clips are being flushed
    Stopping,
}

/// Settings for a recording session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingSettings {
    /// Length of each chunk in seconds (0 = one continuous file)
    pub chunk_length_secs: u64,

    /// Maximum number of chunk files kept on disk
    pub chunk_limit: usize,

    /// Container extension for chunk and clip files
    pub extension: String,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Frame rate fed to the encoder
    pub fps: u32,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            chunk_length_secs: 10,
            chunk_limit: 6,
            extension: "mp4".to_string(),
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

impl RecordingSettings {
    pub fn chunking_enabled(&self) -> bool {
        self.chunk_length_secs > 0
    }

    pub fn chunk_length(&self) -> Duration {
        Duration::from_secs(self.chunk_length_secs)
    }

    /// Chunk length in seconds as used by clip arithmetic
    pub fn chunk_length_f64(&self) -> f64 {
        self.chunk_length_secs as f64
    }

    /// Bytes of one raw RGBA frame
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// A fixed-length segment of the recording
///
/// Offsets are seconds relative to the session start.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoChunk {
    pub index: usize,
    pub path: PathBuf,
    pub start_offset: f64,
    pub end_offset: f64,
}

impl VideoChunk {
    pub fn new(index: usize, path: PathBuf, chunk_length: f64) -> Self {
        Self {
            index,
            path,
            start_offset: index as f64 * chunk_length,
            end_offset: (index + 1) as f64 * chunk_length,
        }
    }
}

/// Files still being written by an encoder
///
/// Shared between the recorder, which registers each chunk while it is
/// open, and trimmers, which must refuse to read those files.
#[derive(Debug, Clone, Default)]
pub struct OpenChunks {
    paths: Arc<RwLock<HashSet<PathBuf>>>,
}

impl OpenChunks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: &Path) {
        self.paths.write().insert(path.to_path_buf());
    }

    pub fn remove(&self, path: &Path) {
        self.paths.write().remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.read().contains(path)
    }
}

/// Result of a completed recording
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResult {
    /// Path to the session directory
    pub session_path: PathBuf,

    /// Number of chunks cut during the session
    pub chunk_count: usize,

    /// Number of clip files logged
    pub clip_count: usize,
}

/// Events emitted during recording
#[derive(Debug, Clone)]
pub enum RecordingEvent {
    /// Recording started into the given session directory
    Started { path: PathBuf },
    /// A chunk was finalized; `finished` marks the last one of the session
    ChunkCut { number: usize, finished: bool },
    /// A clip file was written and logged
    ClipSaved(crate::store::ClipLogEntry),
    /// Recording stopped and the session was finalized
    Stopped { path: PathBuf },
    /// Non-fatal error occurred
    Error(String),
}

/// Recording errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording is already in progress")]
    AlreadyRecording,

    #[error("Recorder is not ready")]
    RecorderNotReady,

    #[error("Encoder error: {0}")]
    Encoder(#[from] super::encoder::EncoderError),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
