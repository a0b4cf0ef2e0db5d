//! Recording session directories
//!
//! Every recording lives in its own directory under the store root:
//! - chunk-NNNNN.<ext>: fixed-length chunks (video.<ext> when chunking is off)
//! - <startMs>-<endMs>.<ext>: clips extracted from the chunks
//! - images/: saved frame images
//! - videos.json: clip log, an array of `{name, start, end}`
//! - .synced: zero-byte marker, telemetry and images are archived and uploaded

use super::schema::ClipLogEntry;
use crate::utils::fs::FileSystemProvider;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Clip log file name
pub const CLIP_LOG_FILE: &str = "videos.json";

/// Sentinel written once a session's small artifacts are uploaded
pub const SYNCED_MARKER: &str = ".synced";

/// Subfolder holding saved frame images
pub const IMAGES_DIR: &str = "images";

const CHUNK_PREFIX: &str = "chunk-";
const CONTINUOUS_STEM: &str = "video";

/// Store-related errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid session: {0}")]
    InvalidSession(String),
}

/// Path layout of one session directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSession {
    dir: PathBuf,
    extension: String,
}

impl RecordingSession {
    /// Wrap an existing directory; nothing is touched on disk
    pub fn open(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory name, used to derive remote folder names
    pub fn name(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}{:05}.{}", CHUNK_PREFIX, index, self.extension))
    }

    /// Single continuous file used when chunking is disabled
    pub fn continuous_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}", CONTINUOUS_STEM, self.extension))
    }

    pub fn clip_path(&self, start: f64, end: f64) -> PathBuf {
        self.dir.join(clip_file_name(start, end, &self.extension))
    }

    pub fn images_dir(&self) -> PathBuf {
        self.dir.join(IMAGES_DIR)
    }

    pub fn clip_log_path(&self) -> PathBuf {
        self.dir.join(CLIP_LOG_FILE)
    }

    pub fn synced_marker_path(&self) -> PathBuf {
        self.dir.join(SYNCED_MARKER)
    }

    /// Archive file for an artifact category, e.g. `telemetry.zip`
    pub fn archive_path(&self, stem: &str) -> PathBuf {
        self.dir.join(format!("{}.zip", stem))
    }

    pub fn is_synced(&self) -> bool {
        self.synced_marker_path().exists()
    }

    /// Read the clip log; a session without one has an empty log
    pub fn read_clip_log(&self) -> Result<Vec<ClipLogEntry>, StoreError> {
        let log_path = self.clip_log_path();

        if !log_path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&log_path)?;
        let entries: Vec<ClipLogEntry> = serde_json::from_str(&content)?;

        Ok(entries)
    }

    /// Replace the clip log atomically
    pub fn write_clip_log(&self, entries: &[ClipLogEntry]) -> Result<(), StoreError> {
        if !self.dir.is_dir() {
            return Err(StoreError::InvalidSession(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }

        let content = serde_json::to_string_pretty(entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(self.clip_log_path())
            .map_err(|e| StoreError::Io(e.error))?;

        tracing::debug!(
            "Wrote {} clip log entries to {:?}",
            entries.len(),
            self.clip_log_path()
        );

        Ok(())
    }

    pub fn append_clip_log(&self, entry: ClipLogEntry) -> Result<(), StoreError> {
        let mut entries = self.read_clip_log()?;
        entries.push(entry);
        self.write_clip_log(&entries)
    }

    /// Write the zero-byte synced marker
    pub fn mark_synced(&self, fs: &dyn FileSystemProvider) -> Result<(), StoreError> {
        fs.create_empty(&self.synced_marker_path())?;
        Ok(())
    }

    /// Total bytes of every file below the session directory
    pub fn dir_size(&self, fs: &dyn FileSystemProvider) -> Result<u64, StoreError> {
        Ok(fs.size(&self.dir)?)
    }
}

/// File name for a clip covering `[start, end]`, in whole milliseconds
pub fn clip_file_name(start: f64, end: f64, extension: &str) -> String {
    format!(
        "{}-{}.{}",
        (start * 1000.0).round() as i64,
        (end * 1000.0).round() as i64,
        extension
    )
}

/// Chunk index encoded in a chunk file name, `None` for any other file
pub fn parse_chunk_index(path: &Path) -> Option<usize> {
    let stem = path.file_stem()?.to_str()?;
    stem.strip_prefix(CHUNK_PREFIX)?.parse().ok()
}

/// Root directory holding all recording sessions
///
/// Clones share the set of sessions currently being recorded, which the
/// sync engine must leave alone.
#[derive(Debug, Clone)]
pub struct RecordStore {
    root: PathBuf,
    extension: String,
    active: Arc<RwLock<HashSet<PathBuf>>>,
}

impl RecordStore {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            active: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Create a new session directory named after its start time and mark
    /// it active
    pub fn create_session(&self, started_at: DateTime<Utc>) -> Result<RecordingSession, StoreError> {
        fs::create_dir_all(&self.root)?;

        let base = started_at.format("%Y-%m-%d_%H-%M-%S-%3f").to_string();
        let mut dir = self.root.join(&base);
        let mut suffix = 1;
        while dir.exists() {
            dir = self.root.join(format!("{}_{}", base, suffix));
            suffix += 1;
        }
        fs::create_dir_all(&dir)?;

        self.active.write().insert(dir.clone());
        tracing::info!("Created recording session {:?}", dir);

        Ok(RecordingSession::open(dir, self.extension.clone()))
    }

    /// Mark a session as no longer being recorded
    pub fn release(&self, session: &RecordingSession) {
        self.active.write().remove(session.dir());
    }

    pub fn is_active(&self, dir: &Path) -> bool {
        self.active.read().contains(dir)
    }

    /// All session directories, oldest first
    pub fn sessions(&self) -> Result<Vec<RecordingSession>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut dirs: Vec<PathBuf> = fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        // Names start with a zero-padded timestamp
        dirs.sort();

        Ok(dirs
            .into_iter()
            .map(|dir| RecordingSession::open(dir, self.extension.clone()))
            .collect())
    }
}
