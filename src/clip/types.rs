//! Clip extraction types

use crate::store::{ClipLogEntry, StoreError};
use std::path::PathBuf;
use thiserror::Error;

/// Window inside a single chunk, in seconds from the chunk start
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimRange {
    pub start: f64,
    pub end: f64,
}

impl TrimRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// How a piece of a clip is produced from its chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    /// Extract a sub-range through the trimmer
    Trim,
    /// The whole chunk is covered; copy the file verbatim
    Copy,
}

/// One chunk's share of a requested time range
#[derive(Debug, Clone, PartialEq)]
pub struct ClipPiece {
    pub chunk_index: usize,
    pub kind: ClipKind,
    pub trim: TrimRange,
    /// Absolute start time written to the clip log
    pub log_start: f64,
    /// Absolute end time written to the clip log
    pub log_end: f64,
}

/// A piece bound to concrete source and destination files
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRequest {
    pub source_chunk_index: usize,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub kind: ClipKind,
    pub trim: TrimRange,
    pub log_entry: ClipLogEntry,
    /// Trim attempts rejected because the source was still open
    pub attempts: u32,
}

/// Errors from the trimmer collaborator
#[derive(Error, Debug)]
pub enum TrimError {
    /// The source chunk is still being written
    #[error("Source is still being written: {0}")]
    SourceNotExportable(PathBuf),

    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Invalid trim range {start:.3}..{end:.3}")]
    InvalidRange { start: f64, end: f64 },

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to callers of `make_clip`
#[derive(Error, Debug)]
pub enum ClipError {
    #[error("Invalid clip range {start:.3}..{end:.3}")]
    InvalidRange { start: f64, end: f64 },

    /// Recording has stopped; new clip requests are not accepted
    #[error("Not recording")]
    NotRecording,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
