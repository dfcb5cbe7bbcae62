//! Overlay clearing for environments being taken out of a repository.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::{RegistryError, Result};
use crate::storage::{clean_path, to_slash};

/// Removes the contents of every `kustomize/*/*/overlays/{env_name}`
/// directory under `root`, except those whose root-relative path is listed
/// in `keep`. The directories themselves stay in place.
///
/// Returns the cleared directories (relative to `root`) in sorted order.
pub fn clear_overlays(root: &Path, env_name: &str, keep: &[&str]) -> Result<Vec<PathBuf>> {
    let _span = tracing::debug_span!("prune.clear_overlays", env = env_name).entered();

    let keep: BTreeSet<PathBuf> = keep.iter().map(|k| clean_path(Path::new(k))).collect();
    let pattern = format!(
        "{}/kustomize/*/*/overlays/{}",
        glob::Pattern::escape(&root.to_string_lossy()),
        glob::Pattern::escape(env_name)
    );
    let entries = glob::glob(&pattern).map_err(|e| RegistryError::InvalidPattern {
        pattern: pattern.clone(),
        reason: e.to_string(),
    })?;

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) if path.is_dir() => Some(path),
            Ok(_) => None,
            Err(e) => {
                log::warn!("Skipping unreadable path while globbing {}: {}", pattern, e);
                None
            }
        })
        .collect();
    dirs.sort();

    let mut cleared = Vec::new();
    for dir in dirs {
        let relative = dir.strip_prefix(root).unwrap_or(&dir).to_path_buf();
        if keep.contains(&clean_path(&relative)) {
            log::debug!("Keeping overlay {}", to_slash(&relative));
            continue;
        }

        empty_dir(&dir)?;
        log::info!("Cleared overlay {}", to_slash(&relative));
        cleared.push(relative);
    }
    Ok(cleared)
}

fn empty_dir(dir: &Path) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| RegistryError::ReadFile {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let path = entry?.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| RegistryError::WriteFile {
            path: path.clone(),
            source: e,
        })?;
    }
    Ok(())
}
