//! GitOps environment registry.
//!
//! This module models a repository laid out as Argo CD Application trees:
//! - Manifest reading with multi-document preservation
//! - Depth-first leaf discovery with cycle and depth guards
//! - A persisted registry of named environments (`codefresh.yaml`)
//! - Grafting an environment from one repository into another
//! - Overlay clearing for environments being removed

pub mod environment;
pub mod error;
pub mod graft;
pub mod lock;
pub mod node;
pub mod prune;
pub mod reader;
pub mod registry;
pub mod resource;
pub mod walker;

pub use environment::{Environment, EnvironmentRef};
pub use error::{RegistryError, Result};
pub use graft::{graft_environment, GraftOptions, GraftReport, RelocatedApp};
pub use lock::RegistryLock;
pub use node::ApplicationNode;
pub use prune::clear_overlays;
pub use reader::{parse_application, read_application};
pub use registry::{validate_environment_name, Config, CONFIG_FILE_NAME, CONFIG_VERSION};
pub use resource::{
    fixed_apps, Application, ApplicationSource, ApplicationSpec, Kustomization, ObjectMeta,
    APPLICATION_KIND, COMPONENTS_APP, DEFAULT_APPS_DIR, ENTITIES_APP, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE, NAME_LABEL, ROOT_APP,
};
pub use walker::{TreeWalker, DEFAULT_MAX_DEPTH};
