//! Trimmer interface and FFmpeg implementation

use super::types::{TrimError, TrimRange};
use crate::recorder::OpenChunks;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Extracts a sub-range of a chunk into a new file
#[async_trait]
pub trait Trimmer: Send + Sync {
    async fn trim(&self, source: &Path, dest: &Path, range: TrimRange) -> Result<(), TrimError>;
}

/// [`Trimmer`] running `ffmpeg` with stream copy
///
/// Chunks registered in [`OpenChunks`] are refused with
/// [`TrimError::SourceNotExportable`].
pub struct FfmpegTrimmer {
    binary: String,
    open_chunks: OpenChunks,
}

impl FfmpegTrimmer {
    pub fn new(open_chunks: OpenChunks) -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            open_chunks,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

/// Build the ffmpeg arguments for a stream-copy trim
pub fn build_trim_args(source: &Path, dest: &Path, range: TrimRange) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-ss".to_string(),
        format!("{:.3}", range.start),
        "-i".to_string(),
        source.to_string_lossy().to_string(),
        "-t".to_string(),
        format!("{:.3}", range.duration()),
        "-c".to_string(),
        "copy".to_string(),
        "-avoid_negative_ts".to_string(),
        "make_zero".to_string(),
        dest.to_string_lossy().to_string(),
    ]
}

#[async_trait]
impl Trimmer for FfmpegTrimmer {
    async fn trim(&self, source: &Path, dest: &Path, range: TrimRange) -> Result<(), TrimError> {
        if self.open_chunks.contains(source) {
            return Err(TrimError::SourceNotExportable(source.to_path_buf()));
        }
        if !source.exists() {
            return Err(TrimError::SourceMissing(source.to_path_buf()));
        }
        if range.duration() <= 0.0 {
            return Err(TrimError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }

        let args = build_trim_args(source, dest, range);
        tracing::debug!("Trimming with FFmpeg: {:?}", args);

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TrimError::Ffmpeg(format!("Failed to run FFmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrimError::Ffmpeg(format!("FFmpeg trim failed: {}", stderr.trim())));
        }

        tracing::info!(
            "Trimmed {:?} [{:.3}, {:.3}] -> {:?}",
            source,
            range.start,
            range.end,
            dest
        );
        Ok(())
    }
}
