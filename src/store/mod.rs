//! Recording store
//!
//! Directory and naming scheme for recording sessions, plus the clip log.

pub mod record_store;
pub mod schema;

pub use record_store::{
    clip_file_name, parse_chunk_index, RecordStore, RecordingSession, StoreError, CLIP_LOG_FILE,
    IMAGES_DIR, SYNCED_MARKER,
};
pub use schema::ClipLogEntry;
