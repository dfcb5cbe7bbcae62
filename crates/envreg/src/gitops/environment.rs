//! Environments: named bindings to a root Application manifest.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{RegistryError, Result};
use super::node::ApplicationNode;
use super::reader::read_application;
use super::walker::TreeWalker;
use crate::storage::resolve_within;

/// A registry entry. The root path is relative to the registry directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    #[serde(rename = "rootAppPath")]
    pub root_app_path: String,
}

impl Environment {
    pub fn new(root_app_path: impl Into<String>) -> Self {
        Self {
            root_app_path: root_app_path.into(),
        }
    }

    /// Location of the root manifest under `repo_root`. Absolute paths and
    /// paths leaving `repo_root` are rejected.
    pub fn root_file(&self, repo_root: &Path) -> Result<PathBuf> {
        resolve_within(repo_root, &self.root_app_path)
    }

    /// Directory holding the root manifest, relative to the registry root.
    pub fn apps_dir(&self) -> PathBuf {
        Path::new(&self.root_app_path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Loads the root Application node.
    pub fn root_app(&self, repo_root: &Path) -> Result<ApplicationNode> {
        let path = self.root_file(repo_root)?;
        read_application(&path)?.ok_or_else(|| RegistryError::InvalidManifest {
            path,
            message: "environment root is not an Application manifest".to_string(),
        })
    }

    /// Every leaf application of this environment, depth-first.
    pub fn leaf_apps(&self, walker: &TreeWalker) -> Result<Vec<ApplicationNode>> {
        walker.leaf_apps(self.root_app(walker.root_dir())?)
    }

    /// The first managed application named `name`, or `None`.
    pub fn get_app_by_name(&self, walker: &TreeWalker, name: &str) -> Result<Option<ApplicationNode>> {
        walker.find_by_name(self.root_app(walker.root_dir())?, name)
    }
}

/// An environment together with the registry directory it resolves against.
///
/// Both operations read from disk on every call and touch no shared state.
#[derive(Debug, Clone, Copy)]
pub struct EnvironmentRef<'a> {
    pub(crate) name: &'a str,
    pub(crate) env: &'a Environment,
    pub(crate) root: &'a Path,
}

impl<'a> EnvironmentRef<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn environment(&self) -> &'a Environment {
        self.env
    }

    pub fn root_app(&self) -> Result<ApplicationNode> {
        self.env.root_app(self.root)
    }

    pub fn leaf_apps(&self) -> Result<Vec<ApplicationNode>> {
        self.env.leaf_apps(&TreeWalker::new(self.root))
    }

    pub fn get_app_by_name(&self, name: &str) -> Result<Option<ApplicationNode>> {
        self.env.get_app_by_name(&TreeWalker::new(self.root), name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_apps_dir() {
        assert_eq!(
            Environment::new("argocd-apps/prod.yaml").apps_dir(),
            PathBuf::from("argocd-apps")
        );
        assert_eq!(Environment::new("prod.yaml").apps_dir(), PathBuf::new());
    }

    #[test]
    fn test_root_must_be_application() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("prod.yaml"), "kind: AppProject\n").unwrap();

        let env = Environment::new("prod.yaml");
        let result = env.root_app(dir.path());
        assert!(matches!(result, Err(RegistryError::InvalidManifest { .. })));
    }

    #[test]
    fn test_root_file_stays_inside_repository() {
        let root = Path::new("/repo");
        assert_eq!(
            Environment::new("argocd-apps/./prod.yaml").root_file(root).unwrap(),
            PathBuf::from("/repo/argocd-apps/prod.yaml")
        );
        assert!(matches!(
            Environment::new("../other/prod.yaml").root_file(root),
            Err(RegistryError::InvalidPath(_))
        ));
        assert!(Environment::new("/etc/prod.yaml").root_file(root).is_err());
    }

    #[test]
    fn test_serializes_root_app_path_key() {
        let yaml = serde_yaml::to_string(&Environment::new("argocd-apps/prod.yaml")).unwrap();
        assert_eq!(yaml, "rootAppPath: argocd-apps/prod.yaml\n");
    }
}
