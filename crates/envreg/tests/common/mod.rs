//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use envreg::{Config, Environment};
use tempfile::TempDir;

/// A managed Application manifest labelled `name`.
pub fn app_manifest(name: &str, source: &str) -> String {
    format!(
        r#"apiVersion: argoproj.io/v1alpha1
kind: Application
metadata:
  name: {name}
  namespace: argocd
  labels:
    codefresh.io/entity: {name}
    app.kubernetes.io/managed-by: cf-argo
spec:
  project: default
  source:
    repoURL: https://example.com/org/gitops.git
    targetRevision: HEAD
    path: {source}
  destination:
    server: https://kubernetes.default.svc
"#
    )
}

/// A scratch repository on disk.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn file(&self, rel: &str, content: &str) -> &Self {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        self
    }

    pub fn app(&self, rel: &str, name: &str, source: &str) -> &Self {
        self.file(rel, &app_manifest(name, source))
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.path(rel)).unwrap()
    }

    /// Writes a registry listing `envs` and loads it back.
    pub fn registry(&self, envs: &[(&str, &str)]) -> Config {
        let mut config = Config::new(self.root());
        for (name, root) in envs {
            config.add_environment(name, Environment::new(*root)).unwrap();
        }
        Config::load(self.root()).unwrap()
    }
}

/// A freshly prepared repository holding environment `env`, the way an
/// installer lays it out before grafting.
pub fn prepared_repo(env: &str) -> TestRepo {
    let repo = TestRepo::new();
    repo.app(&format!("argocd-apps/{env}.yaml"), "root", &format!("argocd-apps/{env}"))
        .file(
            &format!("argocd-apps/{env}-project.yaml"),
            &format!("apiVersion: argoproj.io/v1alpha1\nkind: AppProject\nmetadata:\n  name: {env}\n"),
        )
        .app(
            &format!("argocd-apps/{env}/components.yaml"),
            "components",
            &format!("argocd-apps/{env}/components"),
        )
        .app(
            &format!("argocd-apps/{env}/entities.yaml"),
            "entities",
            &format!("argocd-apps/{env}/entities"),
        )
        .file(&format!("argocd-apps/{env}/entities/.gitkeep"), "")
        .app(
            &format!("argocd-apps/{env}/components/argo-cd.yaml"),
            "argo-cd",
            &format!("kustomize/components/argo-cd/overlays/{env}"),
        )
        .file(
            &format!("kustomize/components/argo-cd/overlays/{env}/kustomization.yaml"),
            "resources:\n  - ../../base\n",
        )
        .file(
            "kustomize/components/argo-cd/base/kustomization.yaml",
            "resources:\n  - install.yaml\n",
        );
    repo.registry(&[(env, &format!("argocd-apps/{env}.yaml"))]);
    repo
}
