//! FFmpeg-backed chunk encoder
//!
//! Raw RGBA frames are piped into an `ffmpeg` child process which writes
//! one H.264 file per recording session.

use super::encoder::{Encoder, EncoderError, EncoderProgress, Frame};
use super::state::RecordingSettings;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};

/// Session state for the currently open file
struct OpenFile {
    process: Child,
    stdin: ChildStdin,
    path: PathBuf,
    frame_size: usize,
    frames_written: u64,
}

/// [`Encoder`] spawning one `ffmpeg` process per chunk
pub struct FfmpegEncoder {
    binary: String,
    open: Option<OpenFile>,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    /// Use a specific ffmpeg executable
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            open: None,
        }
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the ffmpeg arguments for encoding raw frames to `output`
pub fn build_encoder_args(output: &Path, settings: &RecordingSettings) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", settings.width, settings.height),
        "-r".to_string(),
        settings.fps.to_string(),
        "-i".to_string(),
        "-".to_string(), // stdin for video frames
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn start_recording(
        &mut self,
        path: &Path,
        settings: &RecordingSettings,
    ) -> Result<(), EncoderError> {
        if let Some(open) = &self.open {
            return Err(EncoderError::SessionOpen(open.path.clone()));
        }

        let args = build_encoder_args(path, settings);
        tracing::debug!("Starting FFmpeg encoder: {:?}", args);

        let mut process = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EncoderError::RecordingFailed(format!("Failed to start FFmpeg encoder: {}", e))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EncoderError::RecordingFailed("Failed to capture FFmpeg stdin".to_string()))?;

        self.open = Some(OpenFile {
            process,
            stdin,
            path: path.to_path_buf(),
            frame_size: settings.frame_size(),
            frames_written: 0,
        });

        Ok(())
    }

    async fn handle_frame(&mut self, frame: &Frame) -> Result<EncoderProgress, EncoderError> {
        let open = self.open.as_mut().ok_or(EncoderError::NotReadyForData)?;

        if frame.data.len() != open.frame_size {
            return Err(EncoderError::InvalidFrame {
                expected: open.frame_size,
                actual: frame.data.len(),
            });
        }

        open.stdin
            .write_all(&frame.data)
            .await
            .map_err(|e| EncoderError::RecordingFailed(format!("Failed to write frame: {}", e)))?;
        open.frames_written += 1;

        Ok(EncoderProgress {
            frames_written: open.frames_written,
            last_timestamp: frame.timestamp,
        })
    }

    async fn stop_recording(&mut self) -> Result<PathBuf, EncoderError> {
        let OpenFile {
            mut process,
            mut stdin,
            path,
            frames_written,
            ..
        } = self.open.take().ok_or(EncoderError::NotReadyForData)?;

        // Closing stdin signals end of input so FFmpeg writes the trailer
        stdin.flush().await?;
        drop(stdin);

        let status = process.wait().await?;
        if !status.success() {
            return Err(EncoderError::RecordingFailed(format!(
                "FFmpeg exited with {} for {:?}",
                status, path
            )));
        }

        tracing::debug!("Finalized {:?} with {} frames", path, frames_written);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_args_use_frame_geometry() {
        let settings = RecordingSettings {
            width: 640,
            height: 480,
            fps: 24,
            ..Default::default()
        };
        let args = build_encoder_args(Path::new("/s/chunk-00000.mp4"), &settings);

        assert!(args.windows(2).any(|w| w[0] == "-s" && w[1] == "640x480"));
        assert!(args.windows(2).any(|w| w[0] == "-r" && w[1] == "24"));
        assert_eq!(args.last().map(String::as_str), Some("/s/chunk-00000.mp4"));
    }

    #[tokio::test]
    async fn test_frame_without_session_is_not_ready() {
        let mut encoder = FfmpegEncoder::new();
        let result = encoder.handle_frame(&Frame::new(0.0, vec![0; 4])).await;
        assert!(matches!(result, Err(EncoderError::NotReadyForData)));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_to_start() {
        let mut encoder = FfmpegEncoder::with_binary("/nonexistent/ffmpeg-binary");
        let result = encoder
            .start_recording(Path::new("/tmp/out.mp4"), &RecordingSettings::default())
            .await;
        assert!(matches!(result, Err(EncoderError::RecordingFailed(_))));
    }
}
