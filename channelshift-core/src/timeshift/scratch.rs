//! Per-engine scratch directories
//!
//! Several engines (and several processes) may share one scratch root. Each
//! engine writes its buffers into its own `engine-<uuid>/` directory and
//! holds an exclusive advisory lock on the sibling `engine-<uuid>.lock` file
//! for as long as it lives. The sweeper only removes directories whose lock
//! it can take, so a live engine's buffer is never swept.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};
use uuid::Uuid;

use super::buffer::{BufferError, is_buffer_file_name};

/// Name prefix of engine directories and their lock files
pub const ENGINE_DIR_PREFIX: &str = "engine-";
const LOCK_EXTENSION: &str = "lock";
const ACQUIRE_ATTEMPTS: usize = 3;

/// Exclusive claim on one engine directory below the scratch root.
///
/// Dropping the lease removes the directory, then the lock file, then
/// releases the lock.
#[derive(Debug)]
pub struct ScratchLease {
    dir: PathBuf,
    lock_path: PathBuf,
    _lock_file: File,
}

impl ScratchLease {
    /// Claims a fresh engine directory below `root`.
    ///
    /// # Errors
    /// - `BufferError::CreateDirectory` - Root or engine directory could not be created
    /// - `BufferError::Lock` - Lock file could not be created or locked
    pub fn acquire(root: &Path) -> Result<Self, BufferError> {
        fs::create_dir_all(root).map_err(|source| BufferError::CreateDirectory {
            path: root.to_path_buf(),
            source,
        })?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::try_acquire(root) {
                Ok(Some(lease)) => return Ok(lease),
                // Lost a race with a concurrent sweep
                Ok(None) if attempt < ACQUIRE_ATTEMPTS => continue,
                Ok(None) => {
                    return Err(BufferError::Lock {
                        path: root.to_path_buf(),
                        source: io::Error::other("lock file kept disappearing"),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn try_acquire(root: &Path) -> Result<Option<Self>, BufferError> {
        let name = format!("{ENGINE_DIR_PREFIX}{}", Uuid::new_v4());
        let lock_path = root.join(format!("{name}.{LOCK_EXTENSION}"));
        let lock_error = |source: io::Error| BufferError::Lock {
            path: lock_path.clone(),
            source,
        };

        let lock_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(lock_error)?;
        match lock_file.try_lock_exclusive() {
            Ok(()) => {}
            // A sweep got to the fresh file first and is about to remove it
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(lock_error(e)),
        }
        if !lock_path.exists() {
            return Ok(None);
        }

        let lease = Self {
            dir: root.join(&name),
            lock_path,
            _lock_file: lock_file,
        };
        // On failure the lease is dropped and its lock file removed
        fs::create_dir(&lease.dir).map_err(|source| BufferError::CreateDirectory {
            path: lease.dir.clone(),
            source,
        })?;

        debug!("Claimed scratch directory {}", lease.dir.display());
        Ok(Some(lease))
    }

    /// Directory this engine writes its buffers into
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ScratchLease {
    fn drop(&mut self) {
        remove_engine_dir(&self.dir);
        if let Err(e) = fs::remove_file(&self.lock_path) {
            warn!("Failed to remove lock {}: {}", self.lock_path.display(), e);
        }
        debug!("Released scratch directory {}", self.dir.display());
    }
}

fn remove_engine_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}

fn count_buffer_files(dir: &Path) -> usize {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|entry| is_buffer_file_name(&entry.file_name().to_string_lossy()))
                .count()
        })
        .unwrap_or(0)
}

/// Removes the directory guarded by `lock_path` if no engine holds the lock.
///
/// Returns the number of buffer files removed.
fn sweep_engine_dir(lock_path: &Path) -> usize {
    let lock_file = match OpenOptions::new().write(true).open(lock_path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!("Failed to open {}: {}", lock_path.display(), e);
            return 0;
        }
    };
    if lock_file.try_lock_exclusive().is_err() {
        debug!("Scratch lock {} is held; skipping", lock_path.display());
        return 0;
    }

    let dir = lock_path.with_extension("");
    let removed = count_buffer_files(&dir);
    remove_engine_dir(&dir);
    if let Err(e) = fs::remove_file(lock_path) {
        warn!("Failed to remove lock {}: {}", lock_path.display(), e);
    }
    removed
}

/// Removes buffers left in `scratch_dir` by engines that are no longer running.
///
/// Engine directories whose lock is still held belong to a live engine and
/// are left alone, as are unrelated files. Loose buffer files directly in
/// `scratch_dir` are removed. Returns the number of buffer files removed; a
/// missing directory means there is nothing to sweep.
pub fn sweep_stale_buffers(scratch_dir: &Path) -> usize {
    let entries = match fs::read_dir(scratch_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return 0,
        Err(e) => {
            warn!(
                "Failed to read scratch directory {}: {}",
                scratch_dir.display(),
                e
            );
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let path = entry.path();

        if is_buffer_file_name(name) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    removed += 1;
                    debug!("Swept stale timeshift buffer {}", path.display());
                }
                Err(e) => warn!("Failed to sweep {}: {}", path.display(), e),
            }
        } else if name.starts_with(ENGINE_DIR_PREFIX)
            && path.extension().is_some_and(|ext| ext == LOCK_EXTENSION)
        {
            removed += sweep_engine_dir(&path);
        }
    }

    removed
}
