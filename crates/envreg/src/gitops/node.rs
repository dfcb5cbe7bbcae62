//! In-memory handle to one Application manifest and the file it came from.

use std::path::{Path, PathBuf};

use super::error::{RegistryError, Result};
use super::reader::Document;
use super::resource::Application;
use crate::storage::write_atomic;

/// A parsed Application plus the file it was loaded from.
///
/// Nodes are not cached: every traversal reads fresh from disk, so a node
/// saved by one caller is only visible to others after they reload it.
#[derive(Debug, Clone)]
pub struct ApplicationNode {
    app: Application,
    path: PathBuf,
    /// Raw documents of the file, kept so that saving touches only the
    /// Application document.
    documents: Vec<Document>,
    index: usize,
}

impl ApplicationNode {
    pub(crate) fn from_parts(
        app: Application,
        path: PathBuf,
        documents: Vec<Document>,
        index: usize,
    ) -> Self {
        Self {
            app,
            path,
            documents,
            index,
        }
    }

    /// Value of the name label, empty for unmanaged manifests.
    pub fn name(&self) -> &str {
        self.app.entity_name()
    }

    pub fn is_managed(&self) -> bool {
        self.app.is_managed()
    }

    /// Directory holding this node's child manifests, relative to the
    /// registry root.
    pub fn source_path(&self) -> &str {
        &self.app.spec.source.path
    }

    pub fn set_source_path(&mut self, path: impl Into<String>) {
        self.app.spec.source.path = path.into();
    }

    /// The file this node was read from.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    pub fn application(&self) -> &Application {
        &self.app
    }

    /// Renders the file content this node would save.
    pub fn render(&self) -> Result<String> {
        let yaml =
            serde_yaml::to_string(&self.app).map_err(|e| RegistryError::SerializeYaml(e.to_string()))?;

        let mut out = String::new();
        for (i, doc) in self.documents.iter().enumerate() {
            if i != self.index {
                out.push_str(&doc.raw());
                continue;
            }
            // Inline text on the separator line was part of the document
            if !doc.separator.is_empty() {
                out.push_str("---\n");
            }
            out.push_str(&yaml);
        }
        Ok(out)
    }

    /// Serializes the node back to its file. The file is replaced atomically,
    /// so a failed write leaves the previous content in place.
    pub fn save(&self) -> Result<()> {
        let content = self.render()?;
        write_atomic(&self.path, content.as_bytes())?;
        log::debug!("Saved application '{}' to {}", self.name(), self.path.display());
        Ok(())
    }
}
