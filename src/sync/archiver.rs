//! Archive creation for small session artifacts

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("No files to archive")]
    NoRequestedFiles,

    #[error("Archive creation failed for {path}: {reason}")]
    ArchiveCreationFailed { path: PathBuf, reason: String },
}

/// Packs a set of files into a single archive
pub trait Archiver: Send + Sync {
    fn archive(&self, files: &[PathBuf], destination: &Path) -> Result<(), ArchiveError>;
}

/// [`Archiver`] writing deflated zip files
///
/// Entries are stored flat under their file names.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipArchiver;

impl ZipArchiver {
    fn write(files: &[PathBuf], destination: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let out = File::create(destination)?;
        let mut zip = ZipWriter::new(out);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for file in files {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file has no name"))?;
            zip.start_file(name, options)?;
            let mut input = File::open(file)?;
            io::copy(&mut input, &mut zip)?;
        }

        zip.finish()?;
        Ok(())
    }
}

impl Archiver for ZipArchiver {
    fn archive(&self, files: &[PathBuf], destination: &Path) -> Result<(), ArchiveError> {
        if files.is_empty() {
            return Err(ArchiveError::NoRequestedFiles);
        }

        Self::write(files, destination).map_err(|e| {
            // A partial archive must never be reused
            let _ = std::fs::remove_file(destination);
            ArchiveError::ArchiveCreationFailed {
                path: destination.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        tracing::debug!("Archived {} file(s) into {:?}", files.len(), destination);
        Ok(())
    }
}
