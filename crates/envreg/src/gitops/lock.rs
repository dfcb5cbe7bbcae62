//! Advisory lock serializing mutations of one registry directory.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::FileExt;

use super::error::{RegistryError, Result};
use super::registry::CONFIG_FILE_NAME;

/// Exclusive lock on a registry directory, released on drop.
#[derive(Debug)]
pub struct RegistryLock {
    /// Held for the lifetime of the lock.
    _file: File,
    path: PathBuf,
}

impl RegistryLock {
    /// Path of the lock file guarding `root`.
    pub fn lock_path(root: &Path) -> PathBuf {
        root.join(format!(".{}.lock", CONFIG_FILE_NAME))
    }

    /// Takes the lock without blocking. Fails with [`RegistryError::Locked`]
    /// if another handle holds it.
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = Self::lock_path(root);
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .map_err(|e| RegistryError::WriteFile {
                    path: path.clone(),
                    source: e,
                })?;

            if let Some(lock) = Self::try_hold(file, path.clone())? {
                return Ok(lock);
            }
            log::debug!("Lock file {} was replaced while locking; retrying", path.display());
        }
    }

    /// Locks an already opened lock file. Returns `Ok(None)` when the file
    /// was unlinked from `path` by its previous holder before the lock was
    /// taken, in which case the caller must reopen `path`.
    fn try_hold(file: File, path: PathBuf) -> Result<Option<Self>> {
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Err(RegistryError::Locked(path)),
            Err(e) => return Err(RegistryError::WriteFile { path, source: e }),
        }

        if !is_linked_at(&file, &path)? {
            return Ok(None);
        }
        log::debug!("Acquired registry lock {}", path.display());
        Ok(Some(Self { _file: file, path }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// True if `path` still names the open `file`.
#[cfg(unix)]
fn is_linked_at(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata().map_err(|e| RegistryError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    match fs::metadata(path) {
        Ok(current) => Ok(held.dev() == current.dev() && held.ino() == current.ino()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(RegistryError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Open files cannot be unlinked on this platform, so the path still names
/// the file whenever it exists.
#[cfg(not(unix))]
fn is_linked_at(_file: &File, path: &Path) -> Result<bool> {
    Ok(path.exists())
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        // Removed while still held. Closing the handle releases the lock.
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}
