pub mod gitops;
pub mod logging;
pub mod storage;

pub use gitops::{
    clear_overlays, graft_environment, read_application, ApplicationNode, Config, Environment,
    EnvironmentRef, GraftOptions, GraftReport, RegistryError, Result, TreeWalker,
};
pub use logging::init_logging;
