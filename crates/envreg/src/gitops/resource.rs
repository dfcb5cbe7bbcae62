//! Argo CD `Application` manifest types and the label conventions used to
//! decide which manifests belong to an environment tree.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// The `kind` identifying an Application document.
pub const APPLICATION_KIND: &str = "Application";

/// Label carrying the stable entity name of an application.
pub const NAME_LABEL: &str = "codefresh.io/entity";

/// Label identifying the tool that owns a manifest.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Owner value of [`MANAGED_BY_LABEL`] for manifests in an environment tree.
pub const MANAGED_BY_VALUE: &str = "cf-argo";

/// Default directory holding environment root manifests.
pub const DEFAULT_APPS_DIR: &str = "argocd-apps";

/// The conventional top-level applications relocated when grafting.
pub const ROOT_APP: &str = "root";
pub const COMPONENTS_APP: &str = "components";
pub const ENTITIES_APP: &str = "entities";

/// Returns the fixed application names in graft order.
pub fn fixed_apps() -> Vec<String> {
    vec![
        ROOT_APP.to_string(),
        COMPONENTS_APP.to_string(),
        ENTITIES_APP.to_string(),
    ]
}

/// Metadata for an Application, following K8s conventions.
///
/// Labels and annotations are ordered maps so that serialization is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Fields this crate does not interpret (finalizers, ownerReferences, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ObjectMeta {
    /// Creates metadata with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a label to the metadata.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Where an Application's deployable content lives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    /// Directory relative to the repository root.
    #[serde(default)]
    pub path: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub source: ApplicationSource,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// An Argo CD Application document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationSpec,

    /// Top-level fields such as `status` are carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Application {
    /// Creates an Application with the given metadata name and source path.
    pub fn new(name: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self {
            api_version: "argoproj.io/v1alpha1".to_string(),
            kind: APPLICATION_KIND.to_string(),
            metadata: ObjectMeta::new(name),
            spec: ApplicationSpec {
                source: ApplicationSource {
                    path: source_path.into(),
                    extra: BTreeMap::new(),
                },
                extra: BTreeMap::new(),
            },
            extra: BTreeMap::new(),
        }
    }

    /// Value of the name label, or an empty string when absent.
    pub fn entity_name(&self) -> &str {
        self.metadata
            .labels
            .get(NAME_LABEL)
            .map(String::as_str)
            .unwrap_or("")
    }

    /// True if the managed-by label names this tool.
    pub fn is_managed(&self) -> bool {
        self.metadata
            .labels
            .get(MANAGED_BY_LABEL)
            .is_some_and(|owner| owner == MANAGED_BY_VALUE)
    }
}

/// The subset of a kustomization file needed to locate overlays.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Kustomization {
    #[serde(default)]
    pub resources: Vec<String>,
}
