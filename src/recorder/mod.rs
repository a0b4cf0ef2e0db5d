//! Recording system module
//!
//! This module implements the chunked recording pipeline:
//! - Encoder trait for the file-writing collaborator
//! - ChunkBuffer to slice frames into bounded chunk files
//! - Recorder to serialize recording and clip operations on one task

pub mod chunk_buffer;
pub mod coordinator;
pub mod encoder;
pub mod ffmpeg;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use chunk_buffer::{ChunkBuffer, ChunkCut, FrameOutcome};
pub use coordinator::Recorder;
pub use encoder::{Encoder, EncoderError, EncoderProgress, Frame};
pub use ffmpeg::FfmpegEncoder;
pub use state::{
    OpenChunks, RecordingError, RecordingEvent, RecordingResult, RecordingSettings,
    RecordingState, VideoChunk,
};
