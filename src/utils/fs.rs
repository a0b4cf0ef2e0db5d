//! Filesystem access
//!
//! The recorder and the sync engine only ever touch the disk through
//! [`FileSystemProvider`], so tests can observe or fake every mutation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Minimal list/size/exists/remove surface over paths
pub trait FileSystemProvider: Send + Sync {
    /// Entries of a directory, sorted by file name
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Size in bytes; directories report the recursive sum of their files
    fn size(&self, path: &Path) -> io::Result<u64>;

    fn exists(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Remove a file, or a directory with everything below it
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Copy a file verbatim, returning the number of bytes copied
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;

    /// Create (or truncate) a zero-byte file
    fn create_empty(&self, path: &Path) -> io::Result<()>;
}

/// [`FileSystemProvider`] backed by `std::fs`
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl FileSystemProvider for LocalFileSystem {
    fn list(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        entries.sort();
        Ok(entries)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        let meta = fs::metadata(path)?;
        if !meta.is_dir() {
            return Ok(meta.len());
        }

        let mut total = 0;
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            total += self.size(&entry.path())?;
        }
        Ok(total)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        fs::copy(from, to)
    }

    fn create_empty(&self, path: &Path) -> io::Result<()> {
        fs::File::create(path).map(|_| ())
    }
}

/// Extension of a path, lowercased
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
