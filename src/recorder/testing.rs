//! In-memory collaborators for recorder and clip tests

use super::encoder::{Encoder, EncoderError, EncoderProgress, Frame};
use super::state::{OpenChunks, RecordingSettings};
use crate::clip::{TrimError, TrimRange, Trimmer};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Queue of results returned by [`FakeEncoder::handle_frame`] before it
/// falls back to accepting frames
#[derive(Clone, Default)]
pub struct EncoderScript {
    results: Arc<Mutex<VecDeque<Result<(), EncoderError>>>>,
}

impl EncoderScript {
    pub fn push(&self, result: Result<(), EncoderError>) {
        self.results.lock().push_back(result);
    }

    fn next(&self) -> Result<(), EncoderError> {
        self.results.lock().pop_front().unwrap_or(Ok(()))
    }
}

/// Writes frame bytes straight into the chunk file
#[derive(Default)]
pub struct FakeEncoder {
    open: Option<PathBuf>,
    frames_written: u64,
    script: EncoderScript,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> EncoderScript {
        self.script.clone()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn start_recording(
        &mut self,
        path: &Path,
        _settings: &RecordingSettings,
    ) -> Result<(), EncoderError> {
        if let Some(open) = &self.open {
            return Err(EncoderError::SessionOpen(open.clone()));
        }
        std::fs::write(path, b"chunk")?;
        self.open = Some(path.to_path_buf());
        self.frames_written = 0;
        Ok(())
    }

    async fn handle_frame(&mut self, frame: &Frame) -> Result<EncoderProgress, EncoderError> {
        let path = self.open.as_ref().ok_or(EncoderError::NotReadyForData)?;
        self.script.next()?;

        let mut file = OpenOptions::new().append(true).open(path)?;
        file.write_all(&frame.data)?;
        self.frames_written += 1;

        Ok(EncoderProgress {
            frames_written: self.frames_written,
            last_timestamp: frame.timestamp,
        })
    }

    async fn stop_recording(&mut self) -> Result<PathBuf, EncoderError> {
        self.open.take().ok_or(EncoderError::NotReadyForData)
    }
}

/// A trim the fake was asked to perform
#[derive(Debug, Clone, PartialEq)]
pub struct TrimCall {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub range: TrimRange,
}

/// Refuses open chunks like the real trimmer, otherwise writes a small
/// file describing the trim
#[derive(Clone)]
pub struct FakeTrimmer {
    open_chunks: OpenChunks,
    calls: Arc<Mutex<Vec<TrimCall>>>,
}

impl FakeTrimmer {
    pub fn new(open_chunks: OpenChunks) -> Self {
        Self {
            open_chunks,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<TrimCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Trimmer for FakeTrimmer {
    async fn trim(&self, source: &Path, dest: &Path, range: TrimRange) -> Result<(), TrimError> {
        self.calls.lock().push(TrimCall {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            range,
        });

        if self.open_chunks.contains(source) {
            return Err(TrimError::SourceNotExportable(source.to_path_buf()));
        }
        if !source.exists() {
            return Err(TrimError::SourceMissing(source.to_path_buf()));
        }

        std::fs::write(dest, format!("{:.3}-{:.3}", range.start, range.end))?;
        Ok(())
    }
}
