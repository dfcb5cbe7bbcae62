//! Error types for registry, manifest tree and grafting operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or mutating an environment registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to move '{from}' to '{to}': {source}")]
    MoveFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML in '{path}': {message}")]
    ParseYaml { path: PathBuf, message: String },

    #[error("Invalid manifest in '{path}': {message}")]
    InvalidManifest { path: PathBuf, message: String },

    #[error("Failed to serialize YAML: {0}")]
    SerializeYaml(String),

    #[error("Environment already exists: {0}")]
    EnvironmentAlreadyExists(String),

    #[error("Environment does not exist: {0}")]
    EnvironmentNotFound(String),

    #[error("Invalid environment name '{name}': {reason}")]
    InvalidEnvironmentName { name: String, reason: String },

    #[error("Registry at '{0}' has no environments")]
    EmptyRegistry(PathBuf),

    #[error("Layout violation for app '{app}': {message}")]
    LayoutViolation { app: String, message: String },

    #[error("Cycle detected: '{0}' references one of its ancestors")]
    CycleDetected(PathBuf),

    #[error("Application tree under '{path}' exceeds maximum depth {max_depth}")]
    TreeTooDeep { path: PathBuf, max_depth: usize },

    #[error("Destination already exists: {0}")]
    PathConflict(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Registry directory is locked by another process: {0}")]
    Locked(PathBuf),

    #[error("File operation failed: {0}")]
    FileOperation(String),
}

impl From<serde_yaml::Error> for RegistryError {
    fn from(err: serde_yaml::Error) -> Self {
        RegistryError::ParseYaml {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for RegistryError {
    fn from(err: std::io::Error) -> Self {
        RegistryError::FileOperation(err.to_string())
    }
}

impl RegistryError {
    /// Returns true for the "not found" family: a missing registry file or a
    /// missing environment.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RegistryError::ConfigNotFound(_) | RegistryError::EnvironmentNotFound(_)
        )
    }
}

/// Result type for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
