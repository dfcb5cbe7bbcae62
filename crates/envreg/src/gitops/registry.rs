//! The environment registry: a versioned index file at the repository root
//! mapping environment names to their root Application manifests.
//!
//! ```yaml
//! version: "1.0"
//! production:
//!   rootAppPath: argocd-apps/production.yaml
//! staging:
//!   rootAppPath: argocd-apps/staging.yaml
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::environment::{Environment, EnvironmentRef};
use super::error::{RegistryError, Result};
use super::lock::RegistryLock;
use crate::storage::{resolve_within, write_atomic};

/// Version tag written on every persist.
pub const CONFIG_VERSION: &str = "1.0";

/// Name of the registry file at the repository root.
pub const CONFIG_FILE_NAME: &str = "codefresh.yaml";

/// The registry of environments in one repository.
///
/// Every mutation is persisted before it returns; a failed persist reverts
/// the in-memory change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    path: PathBuf,

    #[serde(default)]
    version: String,

    #[serde(flatten)]
    environments: BTreeMap<String, Environment>,
}

impl Config {
    /// Creates an empty registry rooted at `path`. Nothing is written.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            version: CONFIG_VERSION.to_string(),
            environments: BTreeMap::new(),
        }
    }

    /// Creates an empty registry and writes it, refusing to overwrite an
    /// existing registry file.
    pub fn init(path: impl Into<PathBuf>) -> Result<Self> {
        let config = Self::new(path);
        let _lock = RegistryLock::acquire(&config.path)?;
        if config.config_file().exists() {
            return Err(RegistryError::PathConflict(config.config_file()));
        }
        config.write()?;
        log::info!("Initialized registry at {}", config.config_file().display());
        Ok(config)
    }

    /// Loads the registry in `path`. A missing file is reported as
    /// [`RegistryError::ConfigNotFound`].
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = path.join(CONFIG_FILE_NAME);

        let content = match fs::read_to_string(&file) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RegistryError::ConfigNotFound(file));
            }
            Err(e) => return Err(RegistryError::ReadFile { path: file, source: e }),
        };

        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|e| RegistryError::ParseYaml {
                path: file.clone(),
                message: e.to_string(),
            })?;
        config.path = path;

        if config.version != CONFIG_VERSION {
            log::warn!(
                "Registry {} has version '{}', expected '{}'; loading as-is",
                file.display(),
                config.version,
                CONFIG_VERSION
            );
        }

        log::debug!(
            "Loaded registry {} with {} environment(s)",
            file.display(),
            config.environments.len()
        );
        Ok(config)
    }

    /// The directory holding the registry file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config_file(&self) -> PathBuf {
        self.path.join(CONFIG_FILE_NAME)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn environments(&self) -> &BTreeMap<String, Environment> {
        &self.environments
    }

    pub fn contains(&self, name: &str) -> bool {
        self.environments.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }

    /// Looks up an environment bound to this registry's directory.
    pub fn environment(&self, name: &str) -> Option<EnvironmentRef<'_>> {
        self.environments
            .get_key_value(name)
            .map(|(name, env)| EnvironmentRef {
                name,
                env,
                root: &self.path,
            })
    }

    /// The environment with the lexicographically smallest name.
    pub fn first_environment(&self) -> Option<EnvironmentRef<'_>> {
        self.environments
            .iter()
            .next()
            .map(|(name, env)| EnvironmentRef {
                name,
                env,
                root: &self.path,
            })
    }

    /// Resolves a layout reference: the named environment when given (which
    /// must exist), otherwise [`Config::first_environment`].
    pub fn reference_environment(&self, name: Option<&str>) -> Result<Option<EnvironmentRef<'_>>> {
        match name {
            Some(name) => self
                .environment(name)
                .map(Some)
                .ok_or_else(|| RegistryError::EnvironmentNotFound(name.to_string())),
            None => Ok(self.first_environment()),
        }
    }

    /// Writes the whole registry to its file.
    pub fn persist(&self) -> Result<()> {
        let _lock = RegistryLock::acquire(&self.path)?;
        self.write()
    }

    /// Adds an environment and persists. Fails if the name is taken.
    pub fn add_environment(&mut self, name: &str, env: Environment) -> Result<()> {
        let _lock = RegistryLock::acquire(&self.path)?;
        self.add_environment_locked(name, env)
    }

    /// Removes an environment and persists, returning the removed entry.
    pub fn delete_environment(&mut self, name: &str) -> Result<Environment> {
        let _lock = RegistryLock::acquire(&self.path)?;

        let removed = self
            .environments
            .remove(name)
            .ok_or_else(|| RegistryError::EnvironmentNotFound(name.to_string()))?;

        if let Err(e) = self.write() {
            self.environments.insert(name.to_string(), removed);
            return Err(e);
        }

        log::info!("Deleted environment '{}'", name);
        Ok(removed)
    }

    /// [`Config::add_environment`] for callers already holding the lock.
    pub(crate) fn add_environment_locked(&mut self, name: &str, env: Environment) -> Result<()> {
        validate_environment_name(name)?;
        resolve_within(&self.path, &env.root_app_path)?;
        if self.environments.contains_key(name) {
            return Err(RegistryError::EnvironmentAlreadyExists(name.to_string()));
        }

        self.environments.insert(name.to_string(), env);
        if let Err(e) = self.write() {
            self.environments.remove(name);
            return Err(e);
        }

        log::info!("Saved new environment '{}'", name);
        Ok(())
    }

    fn write(&self) -> Result<()> {
        let mut snapshot = self.clone();
        snapshot.version = CONFIG_VERSION.to_string();
        let yaml = serde_yaml::to_string(&snapshot)
            .map_err(|e| RegistryError::SerializeYaml(e.to_string()))?;
        write_atomic(&self.config_file(), yaml.as_bytes())
    }
}

/// Checks that `name` can be used as a registry key and a directory name.
pub fn validate_environment_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "version" {
        Some("'version' is reserved by the registry format")
    } else if name.starts_with('.') {
        Some("name may not start with '.'")
    } else if name.contains(['/', '\\']) {
        Some("name may not contain path separators")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RegistryError::InvalidEnvironmentName {
            name: name.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}
