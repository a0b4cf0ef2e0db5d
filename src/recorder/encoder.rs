//! Chunk encoder interface
//!
//! An encoder owns one file-writing session at a time: it is started on a
//! path, fed timestamped frames, and finalized on stop.

use super::state::RecordingSettings;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture time in seconds on the recording's reference clock
    pub timestamp: f64,
    /// Raw RGBA pixels
    pub data: Vec<u8>,
}

impl Frame {
    pub fn new(timestamp: f64, data: Vec<u8>) -> Self {
        Self { timestamp, data }
    }
}

/// Progress reported after each accepted frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderProgress {
    /// Frames written to the current file
    pub frames_written: u64,
    /// Timestamp of the last frame written
    pub last_timestamp: f64,
}

/// Encoder errors
#[derive(Error, Debug)]
pub enum EncoderError {
    /// The writer cannot take data right now; the frame is dropped
    #[error("Encoder is not ready for data")]
    NotReadyForData,

    /// The writer failed; the current file must be cut
    #[error("Recording failed: {0}")]
    RecordingFailed(String),

    #[error("Frame has {actual} bytes, expected {expected}")]
    InvalidFrame { expected: usize, actual: usize },

    #[error("Encoder already has an open session on {0}")]
    SessionOpen(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One active file-writing session at a time
#[async_trait]
pub trait Encoder: Send {
    /// Open a new output file
    async fn start_recording(
        &mut self,
        path: &Path,
        settings: &RecordingSettings,
    ) -> Result<(), EncoderError>;

    /// Append a frame to the open file
    async fn handle_frame(&mut self, frame: &Frame) -> Result<EncoderProgress, EncoderError>;

    /// Finalize the open file; resolves once the file is complete on disk
    async fn stop_recording(&mut self) -> Result<PathBuf, EncoderError>;
}
