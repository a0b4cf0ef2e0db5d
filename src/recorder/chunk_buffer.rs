//! Chunk buffer
//!
//! Slices a continuous frame stream into fixed-length chunk files, keeping
//! at most `chunk_limit` of them on disk.

use super::encoder::{Encoder, EncoderError, EncoderProgress, Frame};
use super::state::{OpenChunks, RecordingError, RecordingSettings, VideoChunk};
use crate::store::{parse_chunk_index, RecordingSession};
use crate::utils::fs::FileSystemProvider;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// What happened to a frame handed to the buffer
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Written(EncoderProgress),
    /// No open chunk, or the encoder applied backpressure
    Dropped,
    /// The encoder failed; the current chunk must be cut now
    CutRequired(String),
}

/// A finalized chunk
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCut {
    pub number: usize,
    pub finished: bool,
    pub chunk: VideoChunk,
}

/// Writes chunk files for one session at a time
pub struct ChunkBuffer {
    encoder: Box<dyn Encoder>,
    fs: Arc<dyn FileSystemProvider>,
    open_chunks: OpenChunks,
    session: Option<RecordingSession>,
    settings: RecordingSettings,
    /// Index of the open chunk, or of the next one once a chunk is cut
    chunk_number: usize,
    open_path: Option<PathBuf>,
    recording: bool,
}

impl ChunkBuffer {
    pub fn new(
        encoder: Box<dyn Encoder>,
        fs: Arc<dyn FileSystemProvider>,
        open_chunks: OpenChunks,
    ) -> Self {
        Self {
            encoder,
            fs,
            open_chunks,
            session: None,
            settings: RecordingSettings::default(),
            chunk_number: 0,
            open_path: None,
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    /// Index of the chunk currently being written
    pub fn active_chunk(&self) -> Option<usize> {
        self.open_path.as_ref().map(|_| self.chunk_number)
    }

    /// Index of the chunk being written, or about to be
    pub fn current_chunk(&self) -> usize {
        self.chunk_number
    }

    /// File backing a chunk index in the current session
    pub fn chunk_path(&self, index: usize) -> Option<PathBuf> {
        let session = self.session.as_ref()?;
        if self.settings.chunking_enabled() {
            Some(session.chunk_path(index))
        } else {
            Some(session.continuous_path())
        }
    }

    /// Begin a session and open chunk 0
    pub async fn start_recording(
        &mut self,
        session: RecordingSession,
        settings: RecordingSettings,
    ) -> Result<(), RecordingError> {
        if self.recording || self.open_path.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        self.session = Some(session);
        self.settings = settings;
        self.chunk_number = 0;
        self.recording = true;

        if let Err(e) = self.start_chunk(&HashSet::new()).await {
            self.recording = false;
            self.session = None;
            return Err(e);
        }

        Ok(())
    }

    pub async fn handle_frame(&mut self, frame: &Frame) -> FrameOutcome {
        if self.open_path.is_none() {
            return FrameOutcome::Dropped;
        }

        match self.encoder.handle_frame(frame).await {
            Ok(progress) => FrameOutcome::Written(progress),
            Err(EncoderError::NotReadyForData) => FrameOutcome::Dropped,
            Err(e @ EncoderError::InvalidFrame { .. }) => {
                tracing::debug!("Dropping frame at {:.3}s: {}", frame.timestamp, e);
                FrameOutcome::Dropped
            }
            Err(e) => FrameOutcome::CutRequired(e.to_string()),
        }
    }

    /// Finalize the open chunk and advance the chunk counter
    ///
    /// Resolves once the encoder has completed the file. Returns `None`
    /// when no chunk was open.
    pub async fn cut_chunk(&mut self, finished: bool) -> Option<ChunkCut> {
        if finished {
            self.recording = false;
        }

        let path = self.open_path.take()?;
        if let Err(e) = self.encoder.stop_recording().await {
            tracing::error!("Failed to finalize chunk {}: {}", self.chunk_number, e);
        }
        self.open_chunks.remove(&path);

        let number = self.chunk_number;
        self.chunk_number += 1;

        tracing::info!("Cut chunk {} (finished: {})", number, finished);

        Some(ChunkCut {
            number,
            finished,
            chunk: VideoChunk::new(number, path, self.settings.chunk_length_f64()),
        })
    }

    /// Open the next chunk if the session is still recording
    ///
    /// Chunks in `pinned` are kept even when over the retention limit.
    pub async fn begin_next_chunk(&mut self, pinned: &HashSet<usize>) -> Result<(), RecordingError> {
        if !self.recording || self.open_path.is_some() {
            return Ok(());
        }
        self.start_chunk(pinned).await
    }

    async fn start_chunk(&mut self, pinned: &HashSet<usize>) -> Result<(), RecordingError> {
        let path = self
            .chunk_path(self.chunk_number)
            .ok_or(RecordingError::RecorderNotReady)?;

        if self.settings.chunking_enabled() {
            self.enforce_retention(pinned);
        }

        self.encoder.start_recording(&path, &self.settings).await?;
        self.open_chunks.insert(&path);
        self.open_path = Some(path);

        tracing::debug!("Started chunk {}", self.chunk_number);
        Ok(())
    }

    /// Delete the oldest unpinned chunk files so that, with the chunk about
    /// to be opened, at most `chunk_limit` remain
    pub fn enforce_retention(&self, pinned: &HashSet<usize>) -> Vec<PathBuf> {
        let Some(session) = self.session.as_ref() else {
            return Vec::new();
        };

        let chunks: Vec<(usize, PathBuf)> = match self.fs.list(session.dir()) {
            Ok(entries) => entries
                .into_iter()
                .filter_map(|path| parse_chunk_index(&path).map(|index| (index, path)))
                .collect(),
            Err(e) => {
                tracing::error!("Failed to list chunks in {:?}: {}", session.dir(), e);
                return Vec::new();
            }
        };

        let limit = self.settings.chunk_limit.max(1);
        if chunks.len() < limit {
            return Vec::new();
        }
        let excess = chunks.len() + 1 - limit;

        let mut removed = Vec::new();
        for (index, path) in chunks
            .into_iter()
            .filter(|(index, _)| !pinned.contains(index))
            .take(excess)
        {
            match self.fs.remove(&path) {
                Ok(()) => {
                    tracing::debug!("Retention removed chunk {}", index);
                    removed.push(path);
                }
                Err(e) => tracing::error!("Failed to remove chunk {:?}: {}", path, e),
            }
        }
        removed
    }

    /// End the session, returning it with the number of chunks cut
    pub fn finish(&mut self) -> Option<(RecordingSession, usize)> {
        self.recording = false;
        let chunk_count = self.chunk_number;
        self.chunk_number = 0;
        self.session.take().map(|session| (session, chunk_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::testing::FakeEncoder;
    use crate::utils::fs::LocalFileSystem;
    use tempfile::tempdir;

    fn settings(chunk_length_secs: u64, chunk_limit: usize) -> RecordingSettings {
        RecordingSettings {
            chunk_length_secs,
            chunk_limit,
            ..Default::default()
        }
    }

    fn buffer(encoder: FakeEncoder) -> (ChunkBuffer, OpenChunks) {
        let open = OpenChunks::new();
        let buffer = ChunkBuffer::new(Box::new(encoder), Arc::new(LocalFileSystem), open.clone());
        (buffer, open)
    }

    #[tokio::test]
    async fn test_cut_advances_counter_and_opens_next_chunk() {
        let dir = tempdir().unwrap();
        let session = RecordingSession::open(dir.path(), "mp4");
        let (mut buffer, open) = buffer(FakeEncoder::new());

        buffer.start_recording(session.clone(), settings(5, 3)).await.unwrap();
        assert_eq!(buffer.active_chunk(), Some(0));
        assert!(open.contains(&session.chunk_path(0)));

        let cut = buffer.cut_chunk(false).await.unwrap();
        assert_eq!(cut.number, 0);
        assert!(!cut.finished);
        assert_eq!(buffer.active_chunk(), None);
        assert!(!open.contains(&session.chunk_path(0)));

        buffer.begin_next_chunk(&HashSet::new()).await.unwrap();
        assert_eq!(buffer.active_chunk(), Some(1));
        assert!(session.chunk_path(1).exists());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let dir = tempdir().unwrap();
        let session = RecordingSession::open(dir.path(), "mp4");
        let (mut buffer, _) = buffer(FakeEncoder::new());

        buffer.start_recording(session.clone(), settings(5, 3)).await.unwrap();
        let err = buffer.start_recording(session, settings(5, 3)).await.unwrap_err();
        assert!(matches!(err, RecordingError::AlreadyRecording));
    }

    #[tokio::test]
    async fn test_retention_keeps_limit_and_skips_pinned() {
        let dir = tempdir().unwrap();
        let session = RecordingSession::open(dir.path(), "mp4");
        let (mut buffer, _) = buffer(FakeEncoder::new());

        buffer.start_recording(session.clone(), settings(5, 3)).await.unwrap();
        for _ in 0..2 {
            buffer.cut_chunk(false).await.unwrap();
            buffer.begin_next_chunk(&HashSet::new()).await.unwrap();
        }
        assert!(session.chunk_path(0).exists());

        // Chunk 0 is pinned, so chunk 1 goes instead
        buffer.cut_chunk(false).await.unwrap();
        let pinned: HashSet<usize> = [0].into_iter().collect();
        buffer.begin_next_chunk(&pinned).await.unwrap();

        assert!(session.chunk_path(0).exists());
        assert!(!session.chunk_path(1).exists());
        assert!(session.chunk_path(2).exists());
        assert!(session.chunk_path(3).exists());
    }

    #[tokio::test]
    async fn test_chunking_disabled_writes_single_file() {
        let dir = tempdir().unwrap();
        let session = RecordingSession::open(dir.path(), "mp4");
        let (mut buffer, _) = buffer(FakeEncoder::new());

        buffer.start_recording(session.clone(), settings(0, 3)).await.unwrap();
        let cut = buffer.cut_chunk(true).await.unwrap();

        assert!(cut.finished);
        assert_eq!(cut.chunk.path, session.continuous_path());
        assert!(!buffer.is_recording());
        buffer.begin_next_chunk(&HashSet::new()).await.unwrap();
        assert_eq!(buffer.active_chunk(), None);
    }

    #[tokio::test]
    async fn test_backpressure_drops_and_failure_requests_cut() {
        let dir = tempdir().unwrap();
        let session = RecordingSession::open(dir.path(), "mp4");
        let encoder = FakeEncoder::new();
        let script = encoder.script();
        let (mut buffer, _) = buffer(encoder);

        buffer.start_recording(session, settings(5, 3)).await.unwrap();

        script.push(Err(EncoderError::NotReadyForData));
        script.push(Err(EncoderError::RecordingFailed("disk full".to_string())));

        assert_eq!(buffer.handle_frame(&Frame::new(0.1, vec![1])).await, FrameOutcome::Dropped);
        assert!(matches!(
            buffer.handle_frame(&Frame::new(0.2, vec![1])).await,
            FrameOutcome::CutRequired(_)
        ));
        assert!(matches!(
            buffer.handle_frame(&Frame::new(0.3, vec![1])).await,
            FrameOutcome::Written(_)
        ));
    }
}
