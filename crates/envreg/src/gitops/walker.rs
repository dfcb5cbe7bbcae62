//! Depth-first traversal of an Application tree.
//!
//! Children of a node are the managed Application manifests matching
//! `{source_path}/*.yaml` under the registry root, visited in lexicographic
//! filename order. A node without managed children is a leaf.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::error::{RegistryError, Result};
use super::node::ApplicationNode;
use super::reader::read_application;
use crate::storage::{clean_path, resolve_within};

/// Default limit on tree depth.
pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Walks Application trees rooted in a registry directory.
pub struct TreeWalker {
    root_dir: PathBuf,
    max_depth: usize,
}

impl TreeWalker {
    /// Creates a walker resolving source paths against `root_dir`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Returns the managed Application manifests directly below `node`.
    pub fn children(&self, node: &ApplicationNode) -> Result<Vec<ApplicationNode>> {
        let source = node.source_path().trim();
        if source.is_empty() {
            return Ok(Vec::new());
        }

        // Source paths stay inside the registry root; "." names the root itself
        let dir = if clean_path(Path::new(source)).as_os_str().is_empty() {
            self.root_dir.clone()
        } else {
            resolve_within(&self.root_dir, source)?
        };
        let pattern = format!(
            "{}/*.yaml",
            glob::Pattern::escape(&dir.to_string_lossy())
        );
        let entries = glob::glob(&pattern).map_err(|e| RegistryError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("Skipping unreadable path while globbing {}: {}", pattern, e);
                    None
                }
            })
            .filter(|path| path.is_file())
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut children = Vec::new();
        for file in files {
            match read_application(&file)? {
                Some(child) if child.is_managed() => children.push(child),
                Some(_) => log::debug!("Skipping unmanaged application {}", file.display()),
                None => log::debug!("Skipping non-application file {}", file.display()),
            }
        }
        Ok(children)
    }

    /// Collects every leaf below `root`, depth-first.
    pub fn leaf_apps(&self, root: ApplicationNode) -> Result<Vec<ApplicationNode>> {
        let _span = tracing::debug_span!("walker.leaf_apps", root = %root.file_path().display())
            .entered();

        let mut leaves = Vec::new();
        let mut ancestors = HashSet::new();
        self.collect_leaves(root, 0, &mut ancestors, &mut leaves)?;
        Ok(leaves)
    }

    fn collect_leaves(
        &self,
        node: ApplicationNode,
        depth: usize,
        ancestors: &mut HashSet<PathBuf>,
        leaves: &mut Vec<ApplicationNode>,
    ) -> Result<()> {
        let key = self.enter(&node, depth, ancestors)?;

        let children = self.children(&node)?;
        if children.is_empty() {
            leaves.push(node);
        } else {
            for child in children {
                self.collect_leaves(child, depth + 1, ancestors, leaves)?;
            }
        }

        ancestors.remove(&key);
        Ok(())
    }

    /// Finds the first managed node named `name`, in pre-order. Returns
    /// `Ok(None)` when the tree has no such node.
    pub fn find_by_name(&self, root: ApplicationNode, name: &str) -> Result<Option<ApplicationNode>> {
        let _span =
            tracing::debug_span!("walker.find_by_name", app = name, root = %root.file_path().display())
                .entered();

        let mut ancestors = HashSet::new();
        self.find_recurse(root, name, 0, &mut ancestors)
    }

    fn find_recurse(
        &self,
        node: ApplicationNode,
        name: &str,
        depth: usize,
        ancestors: &mut HashSet<PathBuf>,
    ) -> Result<Option<ApplicationNode>> {
        let key = self.enter(&node, depth, ancestors)?;

        if node.is_managed() && node.name() == name {
            return Ok(Some(node));
        }

        for child in self.children(&node)? {
            if let Some(found) = self.find_recurse(child, name, depth + 1, ancestors)? {
                return Ok(Some(found));
            }
        }

        ancestors.remove(&key);
        Ok(None)
    }

    /// Records `node` on the current path, failing on cycles and excess depth.
    fn enter(
        &self,
        node: &ApplicationNode,
        depth: usize,
        ancestors: &mut HashSet<PathBuf>,
    ) -> Result<PathBuf> {
        if depth > self.max_depth {
            return Err(RegistryError::TreeTooDeep {
                path: node.file_path().to_path_buf(),
                max_depth: self.max_depth,
            });
        }

        let key = node
            .file_path()
            .canonicalize()
            .unwrap_or_else(|_| node.file_path().to_path_buf());
        if !ancestors.insert(key.clone()) {
            return Err(RegistryError::CycleDetected(node.file_path().to_path_buf()));
        }
        Ok(key)
    }
}
