//! File system primitives shared by the registry and grafting code.

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::gitops::error::{RegistryError, Result};

/// Writes `content` to `path` by way of a temporary file in the same
/// directory that is renamed over the target. A failure at any point leaves
/// the previous file content intact.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let write_err = |e: io::Error| RegistryError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(content).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;

    // NamedTempFile is created 0600; keep the mode of the file being replaced.
    match fs::metadata(path) {
        Ok(meta) => fs::set_permissions(tmp.path(), meta.permissions()).map_err(write_err)?,
        Err(_) => set_default_permissions(tmp.path()).map_err(write_err)?,
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(unix)]
fn set_default_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_default_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Moves a file or directory tree from `src` to `dst`. Tries `rename`, then
/// copies and deletes when `src` sits on another device. Any other rename
/// failure is returned as is.
pub fn move_path(src: &Path, dst: &Path) -> Result<()> {
    let move_err = |e: io::Error| RegistryError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    };

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            log::debug!("{} is on another device; copying", src.display());
            copy_then_remove(src, dst).map_err(move_err)
        }
        Err(e) => Err(move_err(e)),
    }
}

/// Copies `src` to `dst` and removes `src`. On failure `dst` is gone and
/// `src` is whole again.
fn copy_then_remove(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::symlink_metadata(dst).is_ok() {
        return Err(io::Error::new(
            ErrorKind::AlreadyExists,
            format!("'{}' already exists", dst.display()),
        ));
    }

    if let Err(e) = copy_tree(src, dst) {
        discard(dst);
        return Err(e);
    }

    if let Err(e) = remove_tree(src) {
        // Put back whatever was already deleted before dropping the copy
        match copy_tree(dst, src) {
            Ok(()) => discard(dst),
            Err(restore) => log::warn!(
                "Failed to restore {} from {}: {}",
                src.display(),
                dst.display(),
                restore
            ),
        }
        return Err(e);
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        copy_dir(src, dst)
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

fn remove_tree(path: &Path) -> io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn discard(path: &Path) {
    if fs::symlink_metadata(path).is_err() {
        return;
    }
    if let Err(e) = remove_tree(path) {
        log::warn!("Failed to remove partial copy {}: {}", path.display(), e);
    }
}

fn copy_dir(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Lexically normalizes a path: drops `.` components and folds `..` into the
/// preceding component where one exists.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Renders a relative path with `/` separators, the form used inside
/// manifests and the registry file.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolves a repository-relative path against `root`, rejecting absolute
/// paths, paths escaping the root, and paths naming the root itself.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let cleaned = clean_path(Path::new(relative));
    let escapes = cleaned
        .components()
        .any(|c| !matches!(c, Component::Normal(_)));
    if escapes || cleaned.as_os_str().is_empty() {
        return Err(RegistryError::InvalidPath(format!(
            "'{}' must name a location inside '{}'",
            relative,
            root.display()
        )));
    }
    Ok(root.join(cleaned))
}
