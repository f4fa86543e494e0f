//! On-disk hand-off file between the ingest and playback pipelines

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// File name prefix shared by every session buffer
pub const BUFFER_FILE_PREFIX: &str = "timeshift-";
/// Extension of session buffers; the ingest side writes MPEG-TS
pub const BUFFER_FILE_EXTENSION: &str = "ts";

/// Errors that can occur while setting up a session buffer
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("Failed to create scratch directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create buffer file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to lock scratch directory {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Backing file of one timeshift session.
///
/// Written by exactly one writer (ingest) and read by exactly one reader
/// (playback). Deleting consumes the buffer so a session can only delete
/// its file once.
#[derive(Debug, PartialEq, Eq)]
pub struct TimeshiftBuffer {
    path: PathBuf,
}

impl TimeshiftBuffer {
    /// Creates a new empty buffer file with a unique name inside `scratch_dir`.
    ///
    /// Intermediate directories are created as needed.
    ///
    /// # Errors
    /// - `BufferError::CreateDirectory` - Scratch directory could not be created
    /// - `BufferError::CreateFile` - Buffer file could not be created
    pub fn create(scratch_dir: &Path) -> Result<Self, BufferError> {
        fs::create_dir_all(scratch_dir).map_err(|source| BufferError::CreateDirectory {
            path: scratch_dir.to_path_buf(),
            source,
        })?;

        let file_name = format!(
            "{BUFFER_FILE_PREFIX}{}.{BUFFER_FILE_EXTENSION}",
            Uuid::new_v4()
        );
        let path = scratch_dir.join(file_name);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| BufferError::CreateFile {
                path: path.clone(),
                source,
            })?;

        debug!("Created timeshift buffer {}", path.display());
        Ok(Self { path })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the backing file in bytes
    pub fn size(&self) -> u64 {
        Self::size_of(&self.path)
    }

    /// Current size of the file at `path`, or 0 if it cannot be stat'ed.
    ///
    /// Sampled at high frequency while a writer is active, so a failed stat
    /// reads as "no data yet" instead of an error.
    pub fn size_of(path: &Path) -> u64 {
        fs::metadata(path).map(|metadata| metadata.len()).unwrap_or(0)
    }

    /// Whether the backing file is present on disk
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Removes the backing file.
    ///
    /// Best effort: failures are logged and otherwise ignored. Every session
    /// uses a fresh name, so a leftover file never affects later sessions.
    pub fn delete(self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Deleted timeshift buffer {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Timeshift buffer {} already gone", self.path.display());
            }
            Err(e) => warn!(
                "Failed to delete timeshift buffer {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Checks whether a file name looks like a session buffer
pub fn is_buffer_file_name(name: &str) -> bool {
    name.starts_with(BUFFER_FILE_PREFIX)
        && Path::new(name)
            .extension()
            .is_some_and(|ext| ext == BUFFER_FILE_EXTENSION)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_create_makes_empty_unique_files() {
        let dir = tempdir().unwrap();

        let first = TimeshiftBuffer::create(dir.path()).unwrap();
        let second = TimeshiftBuffer::create(dir.path()).unwrap();

        assert_ne!(first.path(), second.path());
        assert!(first.exists());
        assert_eq!(first.size(), 0);
        assert!(first.path().starts_with(dir.path()));
        assert!(is_buffer_file_name(
            first.path().file_name().unwrap().to_str().unwrap()
        ));
    }

    #[test]
    fn test_create_builds_intermediate_directories() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("c");

        let buffer = TimeshiftBuffer::create(&nested).unwrap();

        assert!(nested.is_dir());
        assert!(buffer.exists());
    }

    #[test]
    fn test_create_fails_when_scratch_dir_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a directory").unwrap();

        let result = TimeshiftBuffer::create(&blocker.join("scratch"));

        assert!(matches!(result, Err(BufferError::CreateDirectory { .. })));
    }

    #[test]
    fn test_size_tracks_growth_and_missing_files_read_zero() {
        let dir = tempdir().unwrap();
        let buffer = TimeshiftBuffer::create(dir.path()).unwrap();

        let mut file = OpenOptions::new().append(true).open(buffer.path()).unwrap();
        file.write_all(&[0u8; 1000]).unwrap();
        file.flush().unwrap();

        assert_eq!(buffer.size(), 1000);
        assert_eq!(TimeshiftBuffer::size_of(&dir.path().join("missing.ts")), 0);
    }

    #[test]
    fn test_delete_is_best_effort() {
        let dir = tempdir().unwrap();
        let buffer = TimeshiftBuffer::create(dir.path()).unwrap();
        let path = buffer.path().to_path_buf();

        fs::remove_file(&path).unwrap();
        buffer.delete();

        assert!(!path.exists());
    }
}
