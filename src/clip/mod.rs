//! Clip extraction
//!
//! Maps absolute time ranges onto chunk files and produces trimmed or
//! copied clips inside the recording session.

pub mod extractor;
pub mod plan;
pub mod trimmer;
pub mod types;

pub use extractor::{ChunkPosition, ClipExtractor, TrimOutcome};
pub use plan::{plan_clip, ChunkTimeline};
pub use trimmer::{FfmpegTrimmer, Trimmer};
pub use types::{ClipError, ClipKind, ClipPiece, ClipRequest, TrimError, TrimRange};
