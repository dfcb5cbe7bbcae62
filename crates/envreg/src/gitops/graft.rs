//! Grafting: moving a freshly prepared environment into a repository that
//! already manages environments of its own.
//!
//! The graft is planned in full before anything touches the disk, then
//! executed while recording every move, created directory and manifest
//! rewrite in a journal. Any failure replays the journal backwards, so the
//! source tree is restored and the destination is left as it was.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::environment::{Environment, EnvironmentRef};
use super::error::{RegistryError, Result};
use super::lock::RegistryLock;
use super::node::ApplicationNode;
use super::reader::read_application;
use super::registry::{validate_environment_name, Config};
use super::resource::{fixed_apps, Kustomization};
use super::walker::{TreeWalker, DEFAULT_MAX_DEPTH};
use crate::storage::{clean_path, move_path, resolve_within, to_slash};

/// Options controlling a graft.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraftOptions {
    /// Name of the environment in the destination registry.
    pub env_name: String,

    /// Environment of the source registry to graft; defaults to its first.
    #[serde(default)]
    pub source_env: Option<String>,

    /// Destination environment whose layout is followed; defaults to the
    /// destination's first environment.
    #[serde(default)]
    pub reference_env: Option<String>,

    /// Applications whose directories are relocated under the new
    /// environment directory.
    #[serde(default = "fixed_apps")]
    pub apps: Vec<String>,

    /// Move leaf overlays next to the reference environment's overlays.
    #[serde(default = "default_true")]
    pub relocate_overlays: bool,

    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl GraftOptions {
    pub fn new(env_name: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            source_env: None,
            reference_env: None,
            apps: fixed_apps(),
            relocate_overlays: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// An application whose manifest was rewritten by a graft.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelocatedApp {
    pub name: String,
    pub manifest: PathBuf,
    pub source_path: String,
}

/// Outcome of a successful graft.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraftReport {
    pub env_name: String,
    pub root_app_path: String,
    pub apps: Vec<RelocatedApp>,
    pub moved_paths: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedMove {
    from: PathBuf,
    to: PathBuf,
}

#[derive(Debug, Clone)]
struct PlannedRewrite {
    app: String,
    manifest: PathBuf,
    source_path: String,
}

#[derive(Debug, Default)]
struct GraftPlan {
    moves: Vec<PlannedMove>,
    rewrites: Vec<PlannedRewrite>,
    root_app_path: PathBuf,
}

/// Grafts an environment of `source` into `dest` and registers it there.
///
/// The destination registry directory is locked for the duration.
pub fn graft_environment(
    dest: &mut Config,
    source: &Config,
    opts: &GraftOptions,
) -> Result<GraftReport> {
    let _span = tracing::info_span!("graft", env = %opts.env_name).entered();

    validate_environment_name(&opts.env_name)?;
    let _lock = RegistryLock::acquire(dest.path())?;

    if dest.contains(&opts.env_name) {
        return Err(RegistryError::EnvironmentAlreadyExists(opts.env_name.clone()));
    }

    let source_env = match &opts.source_env {
        Some(name) => source
            .environment(name)
            .ok_or_else(|| RegistryError::EnvironmentNotFound(name.clone()))?,
        None => source
            .first_environment()
            .ok_or_else(|| RegistryError::EmptyRegistry(source.path().to_path_buf()))?,
    };

    let plan = {
        let reference = dest.reference_environment(opts.reference_env.as_deref())?;
        plan_graft(dest.path(), source, source_env, reference, opts)?
    };

    log::info!(
        "Grafting environment '{}' from {} ({} moves, {} manifests)",
        opts.env_name,
        source.path().display(),
        plan.moves.len(),
        plan.rewrites.len()
    );

    let mut journal = Journal::default();
    match execute(&plan, &mut journal, dest, opts) {
        Ok(report) => Ok(report),
        Err(e) => {
            log::error!("Graft of '{}' failed, rolling back: {}", opts.env_name, e);
            journal.rollback();
            Err(e)
        }
    }
}

fn plan_graft(
    dest_root: &Path,
    source: &Config,
    source_env: EnvironmentRef<'_>,
    reference: Option<EnvironmentRef<'_>>,
    opts: &GraftOptions,
) -> Result<GraftPlan> {
    let source_root = source.path();
    let walker = TreeWalker::new(source_root).with_max_depth(opts.max_depth);

    // The destination's layout wins; an empty destination keeps the source's.
    let apps_dir = match reference {
        Some(reference) => reference.environment().apps_dir(),
        None => source_env.environment().apps_dir(),
    };
    let env_dir = apps_dir.join(&opts.env_name);

    let mut plan = GraftPlan {
        root_app_path: apps_dir.join(format!("{}.yaml", opts.env_name)),
        ..Default::default()
    };

    // Root manifest and its project descriptor
    let root_file = clean_path(&source_env.environment().root_file(source_root)?);
    plan.moves.push(PlannedMove {
        from: root_file.clone(),
        to: dest_root.join(&plan.root_app_path),
    });
    if let Some(stem) = root_file.file_stem().and_then(|s| s.to_str()) {
        let project = root_file.with_file_name(format!("{}-project.yaml", stem));
        if project.is_file() {
            plan.moves.push(PlannedMove {
                from: project,
                to: dest_root.join(apps_dir.join(format!("{}-project.yaml", opts.env_name))),
            });
        }
    }

    // Conventional top-level apps
    let mut root_is_grafted = false;
    for app in &opts.apps {
        let node = source_env
            .environment()
            .get_app_by_name(&walker, app)?
            .ok_or_else(|| RegistryError::LayoutViolation {
                app: app.clone(),
                message: format!("not found in source environment '{}'", source_env.name()),
            })?;

        let manifest = clean_path(node.file_path());
        if same_file(&manifest, &root_file) {
            root_is_grafted = true;
        }

        let new_rel = env_dir.join(app);
        plan_directory_move(&mut plan, source_root, dest_root, &node, &new_rel)?;
        plan.rewrites.push(PlannedRewrite {
            app: app.clone(),
            manifest,
            source_path: to_slash(&new_rel),
        });
    }

    if !root_is_grafted {
        return Err(RegistryError::LayoutViolation {
            app: root_file.display().to_string(),
            message: format!(
                "environment root must be one of the grafted apps ({})",
                opts.apps.join(", ")
            ),
        });
    }

    match reference {
        Some(reference) if opts.relocate_overlays => {
            plan_overlays(&mut plan, dest_root, source_root, source_env, reference, opts)?
        }
        _ => {
            log::info!("Keeping source overlay layout for '{}'", opts.env_name);
            plan_overlays_in_place(&mut plan, dest_root, source_root, source_env, opts)?
        }
    }

    validate_plan(&mut plan, dest_root)?;
    Ok(plan)
}

/// Plans moving each leaf overlay next to the matching reference overlay.
fn plan_overlays(
    plan: &mut GraftPlan,
    dest_root: &Path,
    source_root: &Path,
    source_env: EnvironmentRef<'_>,
    reference: EnvironmentRef<'_>,
    opts: &GraftOptions,
) -> Result<()> {
    let source_walker = TreeWalker::new(source_root).with_max_depth(opts.max_depth);
    let dest_walker = TreeWalker::new(dest_root).with_max_depth(opts.max_depth);

    for leaf in source_env.environment().leaf_apps(&source_walker)? {
        if opts.apps.iter().any(|app| app == leaf.name()) {
            continue;
        }
        if leaf.name().is_empty() {
            return Err(RegistryError::LayoutViolation {
                app: leaf.file_path().display().to_string(),
                message: "leaf application has no name label".to_string(),
            });
        }

        let ref_app = reference
            .environment()
            .get_app_by_name(&dest_walker, leaf.name())?
            .ok_or_else(|| RegistryError::LayoutViolation {
                app: leaf.name().to_string(),
                message: format!(
                    "no counterpart in reference environment '{}'",
                    reference.name()
                ),
            })?;

        let new_rel = overlay_path(dest_root, ref_app.source_path(), &opts.env_name, leaf.name())?;
        plan_directory_move(plan, source_root, dest_root, &leaf, &new_rel)?;
        plan.rewrites.push(PlannedRewrite {
            app: leaf.name().to_string(),
            manifest: clean_path(leaf.file_path()),
            source_path: to_slash(&new_rel),
        });
    }
    Ok(())
}

/// Plans carrying each leaf overlay over at its unchanged relative path; the
/// leaf manifests keep their source paths.
fn plan_overlays_in_place(
    plan: &mut GraftPlan,
    dest_root: &Path,
    source_root: &Path,
    source_env: EnvironmentRef<'_>,
    opts: &GraftOptions,
) -> Result<()> {
    let walker = TreeWalker::new(source_root).with_max_depth(opts.max_depth);
    for leaf in source_env.environment().leaf_apps(&walker)? {
        if opts.apps.iter().any(|app| app == leaf.name()) {
            continue;
        }
        let same_rel = clean_path(Path::new(leaf.source_path()));
        plan_directory_move(plan, source_root, dest_root, &leaf, &same_rel)?;
    }
    Ok(())
}

fn plan_directory_move(
    plan: &mut GraftPlan,
    source_root: &Path,
    dest_root: &Path,
    node: &ApplicationNode,
    new_rel: &Path,
) -> Result<()> {
    if node.source_path().trim().is_empty() {
        return Ok(());
    }
    let old_dir = resolve_within(source_root, node.source_path()).map_err(|e| {
        RegistryError::LayoutViolation {
            app: node.name().to_string(),
            message: e.to_string(),
        }
    })?;

    if old_dir.is_dir() {
        plan.moves.push(PlannedMove {
            from: old_dir,
            to: dest_root.join(new_rel),
        });
    } else {
        log::debug!(
            "App '{}' has no source directory at {}; nothing to move",
            node.name(),
            old_dir.display()
        );
    }
    Ok(())
}

/// Derives the overlay directory for `env_name` from a reference app's
/// kustomization: `{ref_source}/{resources[0]}/../overlays/{env_name}`.
fn overlay_path(dest_root: &Path, ref_source: &str, env_name: &str, app: &str) -> Result<PathBuf> {
    let ref_dir = resolve_within(dest_root, ref_source)?;
    let kustomization_file = ref_dir.join("kustomization.yaml");
    let content = fs::read_to_string(&kustomization_file).map_err(|e| RegistryError::ReadFile {
        path: kustomization_file.clone(),
        source: e,
    })?;
    let kustomization: Kustomization =
        serde_yaml::from_str(&content).map_err(|e| RegistryError::ParseYaml {
            path: kustomization_file.clone(),
            message: e.to_string(),
        })?;

    let base = kustomization
        .resources
        .first()
        .ok_or_else(|| RegistryError::LayoutViolation {
            app: app.to_string(),
            message: format!("{} lists no resources", kustomization_file.display()),
        })?;

    let overlay = clean_path(
        &Path::new(ref_source)
            .join(base)
            .join("..")
            .join("overlays")
            .join(env_name),
    );
    // Must stay inside the destination repository
    resolve_within(dest_root, &to_slash(&overlay))?;
    Ok(overlay)
}

/// Orders moves (files first, then directories deepest-first so nested
/// directories leave their parents before the parents move) and rejects
/// plans that would overwrite or collide.
fn validate_plan(plan: &mut GraftPlan, dest_root: &Path) -> Result<()> {
    let dest_root = clean_path(dest_root);
    for mv in &mut plan.moves {
        mv.from = clean_path(&mv.from);
        mv.to = clean_path(&mv.to);
    }

    let (mut files, mut dirs): (Vec<_>, Vec<_>) =
        plan.moves.drain(..).partition(|mv| !mv.from.is_dir());
    dirs.sort_by_key(|mv| std::cmp::Reverse(mv.from.components().count()));
    files.append(&mut dirs);
    plan.moves = files;

    for (i, mv) in plan.moves.iter().enumerate() {
        if !mv.to.starts_with(&dest_root) {
            return Err(RegistryError::InvalidPath(format!(
                "'{}' is outside the destination repository",
                mv.to.display()
            )));
        }
        if mv.to.exists() {
            return Err(RegistryError::PathConflict(mv.to.clone()));
        }
        if mv.to.starts_with(&mv.from) {
            return Err(RegistryError::InvalidPath(format!(
                "cannot move '{}' into itself",
                mv.from.display()
            )));
        }
        for other in &plan.moves[i + 1..] {
            if other.from == mv.from || other.to == mv.to {
                return Err(RegistryError::LayoutViolation {
                    app: mv.from.display().to_string(),
                    message: format!(
                        "'{}' and '{}' map onto the same location",
                        mv.from.display(),
                        other.from.display()
                    ),
                });
            }
        }
    }
    Ok(())
}

/// Where `path` ends up after the moves run in order.
fn relocate(path: &Path, moves: &[PlannedMove]) -> PathBuf {
    let mut current = path.to_path_buf();
    for mv in moves {
        if let Ok(rest) = current.strip_prefix(&mv.from) {
            current = if rest.as_os_str().is_empty() {
                mv.to.clone()
            } else {
                mv.to.join(rest)
            };
        }
    }
    current
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn execute(
    plan: &GraftPlan,
    journal: &mut Journal,
    dest: &mut Config,
    opts: &GraftOptions,
) -> Result<GraftReport> {
    let dest_root = clean_path(dest.path());
    for mv in &plan.moves {
        log::debug!("Moving {} to {}", mv.from.display(), mv.to.display());
        journal.move_path(&mv.from, &mv.to)?;
    }

    let mut apps = Vec::with_capacity(plan.rewrites.len());
    for rewrite in &plan.rewrites {
        let manifest = relocate(&rewrite.manifest, &plan.moves);
        if !manifest.starts_with(&dest_root) {
            return Err(RegistryError::LayoutViolation {
                app: rewrite.app.clone(),
                message: format!(
                    "manifest {} is not inside a relocated directory",
                    rewrite.manifest.display()
                ),
            });
        }

        let mut node = read_application(&manifest)?.ok_or_else(|| RegistryError::InvalidManifest {
            path: manifest.clone(),
            message: "relocated file no longer holds an Application".to_string(),
        })?;
        node.set_source_path(rewrite.source_path.clone());
        journal.save(&node)?;

        apps.push(RelocatedApp {
            name: rewrite.app.clone(),
            manifest,
            source_path: rewrite.source_path.clone(),
        });
    }

    let root_app_path = to_slash(&plan.root_app_path);
    dest.add_environment_locked(&opts.env_name, Environment::new(root_app_path.clone()))?;

    Ok(GraftReport {
        env_name: opts.env_name.clone(),
        root_app_path,
        apps,
        moved_paths: plan.moves.len(),
    })
}

#[derive(Debug)]
enum JournalEntry {
    CreatedDir(PathBuf),
    Moved { from: PathBuf, to: PathBuf },
    Rewrote { path: PathBuf, original: Vec<u8> },
}

/// Undo log of the side effects performed by a graft.
#[derive(Debug, Default)]
struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    fn move_path(&mut self, from: &Path, to: &Path) -> Result<()> {
        if let Some(parent) = to.parent() {
            self.create_dirs(parent)?;
        }
        move_path(from, to)?;
        self.entries.push(JournalEntry::Moved {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
        });
        Ok(())
    }

    fn create_dirs(&mut self, dir: &Path) -> Result<()> {
        let mut missing = Vec::new();
        let mut current = Some(dir);
        while let Some(d) = current {
            if d.as_os_str().is_empty() || d.exists() {
                break;
            }
            missing.push(d.to_path_buf());
            current = d.parent();
        }

        fs::create_dir_all(dir).map_err(|e| RegistryError::WriteFile {
            path: dir.to_path_buf(),
            source: e,
        })?;
        // Outermost first, so rollback removes the deepest first
        for d in missing.into_iter().rev() {
            self.entries.push(JournalEntry::CreatedDir(d));
        }
        Ok(())
    }

    fn save(&mut self, node: &ApplicationNode) -> Result<()> {
        let path = node.file_path();
        let original = fs::read(path).map_err(|e| RegistryError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        node.save()?;
        self.entries.push(JournalEntry::Rewrote {
            path: path.to_path_buf(),
            original,
        });
        Ok(())
    }

    fn rollback(self) {
        for entry in self.entries.into_iter().rev() {
            let outcome = match &entry {
                JournalEntry::Rewrote { path, original } => {
                    crate::storage::write_atomic(path, original)
                }
                JournalEntry::Moved { from, to } => move_path(to, from),
                JournalEntry::CreatedDir(dir) => fs::remove_dir(dir).map_err(Into::into),
            };
            if let Err(e) = outcome {
                log::warn!("Rollback step {:?} failed: {}", entry, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mv(from: &str, to: &str) -> PlannedMove {
        PlannedMove {
            from: PathBuf::from(from),
            to: PathBuf::from(to),
        }
    }

    #[test]
    fn test_relocate_follows_moves_in_order() {
        let moves = vec![
            mv("/src/apps/prod.yaml", "/dst/apps/qa.yaml"),
            mv("/src/apps/prod/components", "/dst/apps/qa/components"),
            mv("/src/apps/prod", "/dst/apps/qa/root"),
        ];

        assert_eq!(
            relocate(Path::new("/src/apps/prod.yaml"), &moves),
            PathBuf::from("/dst/apps/qa.yaml")
        );
        assert_eq!(
            relocate(Path::new("/src/apps/prod/components.yaml"), &moves),
            PathBuf::from("/dst/apps/qa/root/components.yaml")
        );
        assert_eq!(
            relocate(Path::new("/src/apps/prod/components/argo-cd.yaml"), &moves),
            PathBuf::from("/dst/apps/qa/components/argo-cd.yaml")
        );
        assert_eq!(
            relocate(Path::new("/src/other/x.yaml"), &moves),
            PathBuf::from("/src/other/x.yaml")
        );
    }

    #[test]
    fn test_validate_plan_orders_nested_directories_first() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        fs::create_dir_all(src.join("apps/prod/components")).unwrap();
        fs::write(src.join("apps/prod.yaml"), "kind: Application\n").unwrap();

        let mut plan = GraftPlan {
            moves: vec![
                PlannedMove {
                    from: src.join("apps/prod"),
                    to: dst.join("apps/qa/root"),
                },
                PlannedMove {
                    from: src.join("apps/prod.yaml"),
                    to: dst.join("apps/qa.yaml"),
                },
                PlannedMove {
                    from: src.join("apps/prod/components"),
                    to: dst.join("apps/qa/components"),
                },
            ],
            ..Default::default()
        };
        validate_plan(&mut plan, &dst).unwrap();

        let froms: Vec<_> = plan.moves.iter().map(|m| m.from.clone()).collect();
        assert_eq!(
            froms,
            vec![
                src.join("apps/prod.yaml"),
                src.join("apps/prod/components"),
                src.join("apps/prod"),
            ]
        );
    }

    #[test]
    fn test_validate_plan_rejects_existing_destination() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("dst");
        fs::create_dir_all(dst.join("apps/qa")).unwrap();

        let mut plan = GraftPlan {
            moves: vec![PlannedMove {
                from: dir.path().join("src/apps/prod"),
                to: dst.join("apps/qa"),
            }],
            ..Default::default()
        };
        assert!(matches!(
            validate_plan(&mut plan, &dst),
            Err(RegistryError::PathConflict(_))
        ));
    }

    #[test]
    fn test_overlay_path_from_reference_kustomization() {
        let dir = TempDir::new().unwrap();
        let overlay = dir.path().join("kustomize/components/argo-cd/overlays/staging");
        fs::create_dir_all(&overlay).unwrap();
        fs::write(
            overlay.join("kustomization.yaml"),
            "resources:\n  - ../../base\npatches: []\n",
        )
        .unwrap();

        let path = overlay_path(
            dir.path(),
            "kustomize/components/argo-cd/overlays/staging",
            "production",
            "argo-cd",
        )
        .unwrap();
        assert_eq!(
            path,
            PathBuf::from("kustomize/components/argo-cd/overlays/production")
        );
    }

    #[test]
    fn test_overlay_path_requires_resources() {
        let dir = TempDir::new().unwrap();
        let overlay = dir.path().join("kustomize/a/overlays/staging");
        fs::create_dir_all(&overlay).unwrap();
        fs::write(overlay.join("kustomization.yaml"), "namePrefix: x-\n").unwrap();

        let result = overlay_path(dir.path(), "kustomize/a/overlays/staging", "prod", "a");
        assert!(matches!(result, Err(RegistryError::LayoutViolation { .. })));
    }

    #[test]
    fn test_journal_rollback_restores_moves_and_dirs() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src/apps");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a.yaml"), "original\n").unwrap();

        let mut journal = Journal::default();
        let dst = dir.path().join("dst/deep/apps");
        journal.move_path(&src, &dst).unwrap();
        fs::write(dst.join("a.yaml"), "changed\n").unwrap();
        journal.entries.push(JournalEntry::Rewrote {
            path: dst.join("a.yaml"),
            original: b"original\n".to_vec(),
        });

        journal.rollback();

        assert_eq!(fs::read_to_string(src.join("a.yaml")).unwrap(), "original\n");
        assert!(!dir.path().join("dst").exists());
    }

    #[test]
    fn test_options_defaults_from_yaml() {
        let opts: GraftOptions = serde_yaml::from_str("envName: production\n").unwrap();
        assert_eq!(opts.env_name, "production");
        assert_eq!(opts.apps, vec!["root", "components", "entities"]);
        assert!(opts.relocate_overlays);
        assert_eq!(opts.max_depth, DEFAULT_MAX_DEPTH);
        assert!(opts.source_env.is_none());
    }
}
