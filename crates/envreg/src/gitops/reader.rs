//! Manifest reader: finds the Application document inside a YAML file.

use std::fs;
use std::path::Path;

use serde_yaml::Value;

use super::error::{RegistryError, Result};
use super::node::ApplicationNode;
use super::resource::{Application, APPLICATION_KIND, MANAGED_BY_LABEL, MANAGED_BY_VALUE};

/// Reads `path` and returns the first Application document it contains.
///
/// Returns `Ok(None)` when the file holds no Application, so callers globbing
/// a directory can skip unrelated YAML. Malformed YAML is an error.
pub fn read_application(path: &Path) -> Result<Option<ApplicationNode>> {
    let content = fs::read_to_string(path).map_err(|e| RegistryError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_application(&content, path)
}

/// Parses manifest content that was read from `path`.
///
/// An Application document that does not decode is an error when it carries
/// the managed-by label. Without the label it belongs to someone else and is
/// skipped like any other foreign document.
pub fn parse_application(content: &str, path: &Path) -> Result<Option<ApplicationNode>> {
    let documents = split_documents(content);

    for (index, doc) in documents.iter().enumerate() {
        let source = doc.source();
        if is_blank_document(&source) {
            continue;
        }

        let value: Value = serde_yaml::from_str(&source).map_err(|e| RegistryError::ParseYaml {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        // A tag on the separator line wraps the whole document
        let value = match value {
            Value::Tagged(tagged) => tagged.value,
            other => other,
        };

        let kind = value.get("kind").and_then(Value::as_str);
        if kind != Some(APPLICATION_KIND) {
            continue;
        }

        let managed = has_managed_label(&value);
        let app: Application = match serde_yaml::from_value(value) {
            Ok(app) => app,
            Err(e) if !managed => {
                log::debug!("Skipping undecodable foreign application in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => {
                return Err(RegistryError::InvalidManifest {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };

        log::debug!("Loaded application '{}' from {}", app.metadata.name, path.display());
        return Ok(Some(ApplicationNode::from_parts(
            app,
            path.to_path_buf(),
            documents,
            index,
        )));
    }

    Ok(None)
}

fn has_managed_label(value: &Value) -> bool {
    value
        .get("metadata")
        .and_then(|meta| meta.get("labels"))
        .and_then(|labels| labels.get(MANAGED_BY_LABEL))
        .and_then(Value::as_str)
        == Some(MANAGED_BY_VALUE)
}

/// One document of a YAML stream, as it appeared in the file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Document {
    /// The `---` line opening the document, empty for a leading document
    /// without one.
    pub(crate) separator: String,
    pub(crate) body: String,
}

impl Document {
    /// Text handed to the YAML parser: anything following the marker on the
    /// separator line (a tag, a comment, inline content) plus the body.
    pub(crate) fn source(&self) -> String {
        let inline = self
            .separator
            .strip_prefix("---")
            .map(str::trim)
            .unwrap_or_default();
        if inline.is_empty() {
            self.body.clone()
        } else {
            format!("{}\n{}", inline, self.body)
        }
    }

    /// The document exactly as read.
    pub(crate) fn raw(&self) -> String {
        format!("{}{}", self.separator, self.body)
    }
}

/// Splits a multi-document YAML stream. A line opens a new document when it
/// starts with `---` followed by whitespace or the end of the line.
/// Concatenating the raw documents reproduces the input.
pub(crate) fn split_documents(content: &str) -> Vec<Document> {
    let mut documents = Vec::new();
    let mut current = Document {
        separator: String::new(),
        body: String::new(),
    };

    for line in content.split_inclusive('\n') {
        if is_separator(line) {
            let next = Document {
                separator: line.to_string(),
                body: String::new(),
            };
            documents.push(std::mem::replace(&mut current, next));
        } else {
            current.body.push_str(line);
        }
    }
    documents.push(current);
    documents
}

fn is_separator(line: &str) -> bool {
    match line.strip_prefix("---") {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}

fn is_blank_document(doc: &str) -> bool {
    doc.lines().all(|line| {
        let trimmed = line.trim();
        trimmed.is_empty() || trimmed.starts_with('#')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PROJECT: &str = r#"apiVersion: argoproj.io/v1alpha1
kind: AppProject
metadata:
  name: prod
spec:
  sourceRepos: ["*"]
"#;

    const APP: &str = r#"apiVersion: argoproj.io/v1alpha1
kind: Application
metadata:
  name: prod-root
  labels:
    codefresh.io/entity: root
    app.kubernetes.io/managed-by: cf-argo
spec:
  source:
    path: argocd-apps/prod
"#;

    #[test]
    fn test_finds_application_after_other_documents() {
        let content = format!("{}---\n{}", PROJECT, APP);
        let node = parse_application(&content, Path::new("prod.yaml"))
            .unwrap()
            .expect("application document");

        assert_eq!(node.name(), "root");
        assert!(node.is_managed());
        assert_eq!(node.source_path(), "argocd-apps/prod");
        assert_eq!(node.file_path(), Path::new("prod.yaml"));
    }

    #[test]
    fn test_non_application_file_is_none() {
        let result = parse_application(PROJECT, Path::new("project.yaml")).unwrap();
        assert!(result.is_none());

        let kustomization = "resources:\n  - ../base\n";
        let result = parse_application(kustomization, Path::new("kustomization.yaml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_empty_and_comment_documents_are_skipped() {
        let content = format!("---\n# leading comment\n---\n{}", APP);
        let node = parse_application(&content, Path::new("app.yaml")).unwrap();
        assert!(node.is_some());
        assert!(parse_application("", Path::new("empty.yaml")).unwrap().is_none());
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        let content = "kind: Application\nmetadata: [unclosed\n";
        let result = parse_application(content, Path::new("broken.yaml"));
        assert!(matches!(result, Err(RegistryError::ParseYaml { .. })));
    }

    #[test]
    fn test_application_with_wrong_shape_is_invalid() {
        let content = "apiVersion: v1\nkind: Application\nmetadata:\n  labels:\n    app.kubernetes.io/managed-by: cf-argo\nspec: [1, 2]\n";
        let result = parse_application(content, Path::new("bad.yaml"));
        assert!(matches!(result, Err(RegistryError::InvalidManifest { .. })));
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = read_application(&dir.path().join("missing.yaml"));
        assert!(matches!(result, Err(RegistryError::ReadFile { .. })));
    }

    #[test]
    fn test_reader_does_not_modify_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.yaml");
        let content = format!("{}---\n{}", PROJECT, APP);
        fs::write(&path, &content).unwrap();

        read_application(&path).unwrap().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), content);
    }

    #[test]
    fn test_split_documents_round_trip() {
        let content = "---\na: 1\n--- # second\nb: 2\n";
        let docs = split_documents(content);
        assert_eq!(docs.len(), 3);
        assert_eq!(docs[1].source(), "a: 1\n");
        assert_eq!(docs[2].source(), "# second\nb: 2\n");
        let joined: String = docs.iter().map(Document::raw).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn test_separator_with_comment() {
        let content = format!("{}--- # application\n{}", PROJECT, APP);
        let node = parse_application(&content, Path::new("prod.yaml"))
            .unwrap()
            .expect("application document");
        assert_eq!(node.name(), "root");
    }

    #[test]
    fn test_separator_with_tag() {
        let content = format!("{}--- !argo\n{}", PROJECT, APP);
        let node = parse_application(&content, Path::new("prod.yaml"))
            .unwrap()
            .expect("application document");
        assert_eq!(node.source_path(), "argocd-apps/prod");
    }

    #[test]
    fn test_separator_with_inline_content() {
        let content = "--- apiVersion: v1\nkind: ConfigMap\n---\napiVersion: v1\nkind: Application\nmetadata:\n  name: x\nspec:\n  source:\n    path: p\n";
        let node = parse_application(content, Path::new("x.yaml")).unwrap().unwrap();
        assert_eq!(node.source_path(), "p");
        assert!(!is_separator("----\n"));
        assert!(!is_separator("---x\n"));
    }

    #[test]
    fn test_undecodable_foreign_application_is_skipped() {
        let foreign = "apiVersion: argoproj.io/v1alpha1\nkind: Application\nmetadata:\n  name: foreign\n  labels:\n    tier: 1\nspec:\n  source:\n    path: x\n";
        assert!(parse_application(foreign, Path::new("foreign.yaml")).unwrap().is_none());

        // A later managed Application in the same file is still found
        let content = format!("{}---\n{}", foreign, APP);
        let node = parse_application(&content, Path::new("both.yaml")).unwrap().unwrap();
        assert_eq!(node.name(), "root");
    }

    #[test]
    fn test_undecodable_managed_application_is_invalid() {
        let content = "apiVersion: v1\nkind: Application\nmetadata:\n  name: x\n  labels:\n    app.kubernetes.io/managed-by: cf-argo\n    tier: 1\nspec:\n  source:\n    path: x\n";
        let result = parse_application(content, Path::new("x.yaml"));
        assert!(matches!(result, Err(RegistryError::InvalidManifest { .. })));
    }
}
