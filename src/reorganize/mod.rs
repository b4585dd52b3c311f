//! Post-export artifact reorganization.
//!
//! An exporter leaves a nested staging tree of mixed-format files. A run
//! consumes it in four strictly ordered phases:
//!
//! 1. [`prune`]: delete every file that is not the retained format, and
//!    remove directories as they empty out (post-order).
//! 2. [`rename_artifacts`]: canonicalize the surviving file names in place.
//! 3. [`publish`]: copy the survivors, flattened, into the destination.
//! 4. [`cleanup`]: remove what is left of the staging tree.
//!
//! Each phase is a standalone function over explicit paths, and
//! [`reorganize`] composes them. Any failure aborts the run with the phase
//! and path attached; nothing is skipped silently.

pub mod report;

pub use report::{Action, ActionKind, ReorganizeReport};

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{Phase, StagehandError};
use crate::rules::RuleTable;

/// The single file-name suffix kept by pruning.
///
/// Stored with a leading dot; `tflite` and `.tflite` are equivalent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RetainedExtension(String);

impl RetainedExtension {
    pub fn new(extension: &str) -> Result<Self, StagehandError> {
        let trimmed = extension.trim();
        let bare = trimmed.strip_prefix('.').unwrap_or(trimmed);
        if bare.is_empty() {
            return Err(StagehandError::EmptyExtension);
        }
        Ok(Self(format!(".{bare}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-sensitive suffix test on a file name.
    pub fn matches(&self, file_name: &OsStr) -> bool {
        file_name.to_string_lossy().ends_with(&self.0)
    }
}

impl fmt::Display for RetainedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What publishing does when the destination already holds a file of the
/// same name.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExisting {
    /// Replace the existing file.
    #[default]
    Overwrite,
    /// Fail with a rename conflict before anything is copied.
    Refuse,
}

/// Options for a reorganization run.
#[derive(Clone, Debug, Default)]
pub struct ReorganizeOptions {
    pub on_existing: OnExisting,
}

/// Consume `staging_root` and publish its retained artifacts into
/// `destination` under canonical names.
///
/// Fails with [`StagehandError::NotFound`] before touching anything if the
/// staging root is not a directory.
pub fn reorganize(
    staging_root: &Path,
    extension: &RetainedExtension,
    rules: &RuleTable,
    destination: &Path,
    options: &ReorganizeOptions,
) -> Result<ReorganizeReport, StagehandError> {
    if !staging_root.is_dir() {
        return Err(StagehandError::NotFound {
            phase: Phase::Discover,
            path: staging_root.to_path_buf(),
        });
    }
    ensure_destination_outside(staging_root, destination)?;

    info!(
        "Reorganizing {} into {} (keeping {})",
        staging_root.display(),
        destination.display(),
        extension
    );

    let mut report = ReorganizeReport::new(staging_root, destination);

    timed(Phase::Prune, || prune(staging_root, extension, &mut report))?;
    timed(Phase::Rename, || {
        rename_artifacts(staging_root, rules, &mut report)
    })?;
    timed(Phase::Publish, || {
        publish(staging_root, destination, options.on_existing, &mut report)
    })?;
    timed(Phase::Cleanup, || cleanup(staging_root, &mut report))?;

    info!(
        "Saved {} artifact(s) to {}",
        report.published_count(),
        destination.display()
    );
    Ok(report)
}

/// Delete every file under `root` whose name does not end with `extension`,
/// and remove directories that end up empty.
///
/// The walk is post-order, so a directory is inspected only after all of
/// its children were handled. `root` itself is kept. Links are not
/// followed; a link is pruned like a file.
pub fn prune(
    root: &Path,
    extension: &RetainedExtension,
    report: &mut ReorganizeReport,
) -> Result<(), StagehandError> {
    for entry in WalkDir::new(root).min_depth(1).contents_first(true) {
        let entry = entry.map_err(|source| walk_error(Phase::Prune, root, source))?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            if is_empty_dir(path, Phase::Prune)? {
                fs::remove_dir(path).map_err(|e| StagehandError::io(Phase::Prune, path, e))?;
                info!("Removed directory: {}", path.display());
                report.add(Action::removed_dir(Phase::Prune, path));
            }
        } else if !extension.matches(entry.file_name()) {
            fs::remove_file(path).map_err(|e| StagehandError::io(Phase::Prune, path, e))?;
            info!("Removed file: {}", path.display());
            report.add(Action::removed_file(Phase::Prune, path));
        }
    }

    Ok(())
}

/// Rename every file under `root` in place according to `rules`.
///
/// All new names are planned before anything is renamed. If two files
/// would end up at the same path, the phase fails with
/// [`StagehandError::RenameConflict`] and the tree is left unchanged. A name
/// that rewrites to nothing, `.` or `..` fails with
/// [`StagehandError::InvalidRule`], also before anything moves.
pub fn rename_artifacts(
    root: &Path,
    rules: &RuleTable,
    report: &mut ReorganizeReport,
) -> Result<(), StagehandError> {
    let files = collect_files(root, Phase::Rename)?;

    let mut planned: Vec<(PathBuf, PathBuf)> = Vec::new();
    let mut final_paths: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();

    for path in files {
        let target = match path.file_name().and_then(OsStr::to_str) {
            Some(name) => {
                let renamed = rules.apply(name);
                if renamed == name {
                    path.clone()
                } else if is_plain_file_name(&renamed) {
                    path.with_file_name(&*renamed)
                } else {
                    return Err(StagehandError::InvalidRule(format!(
                        "{} would be renamed to '{}'",
                        path.display(),
                        renamed
                    )));
                }
            }
            None => {
                debug!("Skipping non-UTF-8 file name: {}", path.display());
                path.clone()
            }
        };

        final_paths
            .entry(target.clone())
            .or_default()
            .push(path.clone());
        if target != path {
            planned.push((path, target));
        }
    }

    if let Some((target, sources)) = final_paths.into_iter().find(|(_, s)| s.len() > 1) {
        return Err(conflict(Phase::Rename, &target, sources));
    }

    // A target may still be occupied by a file that is itself about to be
    // renamed away; retry those once the rest has moved.
    let mut pending = planned;
    while !pending.is_empty() {
        let before = pending.len();
        let mut blocked = Vec::new();

        for (from, to) in pending {
            if to.symlink_metadata().is_ok() {
                blocked.push((from, to));
                continue;
            }
            fs::rename(&from, &to).map_err(|e| StagehandError::io(Phase::Rename, &from, e))?;
            info!("Renamed {} to {}", from.display(), to.display());
            report.add(Action::renamed(from, to));
        }

        if blocked.len() == before {
            let (from, to) = blocked.swap_remove(0);
            let target = to.clone();
            return Err(conflict(Phase::Rename, &target, vec![from, to]));
        }
        pending = blocked;
    }

    Ok(())
}

/// Copy every file under `root` into `destination`, flattening the tree.
///
/// Collisions are detected before the first copy: two sources with the same
/// file name always conflict, and under [`OnExisting::Refuse`] so does a
/// name already present in the destination. The destination is created if
/// absent.
pub fn publish(
    root: &Path,
    destination: &Path,
    on_existing: OnExisting,
    report: &mut ReorganizeReport,
) -> Result<(), StagehandError> {
    let files = collect_files(root, Phase::Publish)?;

    let mut by_name: BTreeMap<OsString, Vec<PathBuf>> = BTreeMap::new();
    for path in files {
        if let Some(name) = path.file_name() {
            by_name.entry(name.to_os_string()).or_default().push(path);
        }
    }

    let mut copies = Vec::with_capacity(by_name.len());
    for (name, mut sources) in by_name {
        let target = destination.join(&name);
        if sources.len() > 1 {
            return Err(conflict(Phase::Publish, &target, sources));
        }
        if on_existing == OnExisting::Refuse && target.exists() {
            sources.push(target.clone());
            return Err(conflict(Phase::Publish, &target, sources));
        }
        copies.push((sources.swap_remove(0), target));
    }

    fs::create_dir_all(destination)
        .map_err(|e| StagehandError::io(Phase::Publish, destination, e))?;

    for (from, to) in copies {
        fs::copy(&from, &to).map_err(|e| StagehandError::io(Phase::Publish, &from, e))?;
        info!("Copied {} to {}", from.display(), to.display());
        report.add(Action::copied(from, to));
    }

    Ok(())
}

/// Remove `root` and everything below it, one logged entry at a time.
pub fn cleanup(root: &Path, report: &mut ReorganizeReport) -> Result<(), StagehandError> {
    for entry in WalkDir::new(root).contents_first(true) {
        let entry = entry.map_err(|source| walk_error(Phase::Cleanup, root, source))?;
        let path = entry.path();

        if entry.file_type().is_dir() {
            fs::remove_dir(path).map_err(|e| StagehandError::io(Phase::Cleanup, path, e))?;
            info!("Removed directory: {}", path.display());
            report.add(Action::removed_dir(Phase::Cleanup, path));
        } else {
            fs::remove_file(path).map_err(|e| StagehandError::io(Phase::Cleanup, path, e))?;
            info!("Removed file: {}", path.display());
            report.add(Action::removed_file(Phase::Cleanup, path));
        }
    }

    Ok(())
}

fn timed<T>(
    phase: Phase,
    f: impl FnOnce() -> Result<T, StagehandError>,
) -> Result<T, StagehandError> {
    let start = Instant::now();
    let result = f();
    debug!(
        "Phase '{}' finished in {:.2} ms",
        phase,
        start.elapsed().as_secs_f64() * 1000.0
    );
    result
}

/// Files (and links) under `root`, sorted by path for deterministic runs.
fn collect_files(root: &Path, phase: Phase) -> Result<Vec<PathBuf>, StagehandError> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|source| walk_error(phase, root, source))?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// True if `name` is exactly one normal path component.
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(first)), None) if first == OsStr::new(name)
    )
}

fn is_empty_dir(path: &Path, phase: Phase) -> Result<bool, StagehandError> {
    let mut entries = fs::read_dir(path).map_err(|e| StagehandError::io(phase, path, e))?;
    Ok(entries.next().is_none())
}

fn walk_error(phase: Phase, root: &Path, source: walkdir::Error) -> StagehandError {
    let path = source.path().unwrap_or(root).to_path_buf();
    StagehandError::io(phase, path, source.into())
}

fn conflict(phase: Phase, target: &Path, sources: Vec<PathBuf>) -> StagehandError {
    StagehandError::RenameConflict {
        phase,
        name: target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        sources,
    }
}

/// Publishing into the staging tree would let cleanup delete the result.
///
/// Both paths are resolved through `..` and symlinks first; the destination
/// may not exist yet.
fn ensure_destination_outside(staging_root: &Path, destination: &Path) -> Result<(), StagehandError> {
    let staging = fs::canonicalize(staging_root)
        .map_err(|e| StagehandError::io(Phase::Discover, staging_root, e))?;
    let dest = resolve_partial(destination)
        .map_err(|e| StagehandError::io(Phase::Discover, destination, e))?;

    if dest.starts_with(&staging) {
        return Err(StagehandError::DestinationInsideStaging {
            destination: destination.to_path_buf(),
            staging_root: staging_root.to_path_buf(),
        });
    }
    Ok(())
}

/// Canonicalize the deepest existing ancestor of `path`, then replay the
/// remaining components, re-canonicalizing whenever the result exists.
fn resolve_partial(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;

    let mut base = absolute.as_path();
    let mut tail = Vec::new();
    while !base.exists() {
        match (base.parent(), base.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                base = parent;
            }
            // `..` or the filesystem root: keep it for the replay below.
            _ => match base.parent() {
                Some(parent) => {
                    tail.push(OsString::from(".."));
                    base = parent;
                }
                None => break,
            },
        }
    }

    let mut resolved = fs::canonicalize(base).unwrap_or_else(|_| base.to_path_buf());
    for name in tail.into_iter().rev() {
        if name == ".." {
            resolved.pop();
        } else {
            resolved.push(name);
        }
        if let Ok(canonical) = fs::canonicalize(&resolved) {
            resolved = canonical;
        }
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(path, b"model").expect("write file");
    }

    fn tflite() -> RetainedExtension {
        RetainedExtension::new("tflite").unwrap()
    }

    #[test]
    fn extension_is_normalized_with_leading_dot() {
        assert_eq!(tflite().as_str(), ".tflite");
        assert_eq!(RetainedExtension::new(".tflite").unwrap(), tflite());
        assert!(matches!(
            RetainedExtension::new("."),
            Err(StagehandError::EmptyExtension)
        ));
        assert!(RetainedExtension::new("  ").is_err());
    }

    #[test]
    fn extension_match_is_case_sensitive_suffix() {
        let ext = tflite();
        assert!(ext.matches(OsStr::new("a_float16.tflite")));
        assert!(!ext.matches(OsStr::new("a.TFLITE")));
        assert!(!ext.matches(OsStr::new("a.tflite.bak")));
    }

    #[test]
    fn prune_keeps_retained_files_and_their_dirs() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        touch(&root.join("a.tflite"));
        touch(&root.join("a.onnx"));
        touch(&root.join("variables/variables.index"));
        touch(&root.join("nested/deeper/b.tflite"));
        touch(&root.join("nested/deeper/b.pb"));
        fs::create_dir_all(root.join("assets")).expect("create empty dir");

        let mut report = ReorganizeReport::default();
        prune(&root, &tflite(), &mut report).expect("prune");

        assert!(root.join("a.tflite").is_file());
        assert!(root.join("nested/deeper/b.tflite").is_file());
        assert!(!root.join("a.onnx").exists());
        assert!(!root.join("nested/deeper/b.pb").exists());
        assert!(!root.join("variables").exists());
        assert!(!root.join("assets").exists());
        assert!(root.is_dir());
        assert_eq!(report.removed_file_count(), 3);
        assert_eq!(report.removed_dir_count(), 2);
    }

    #[test]
    fn rename_works_in_nested_dirs() {
        let temp = tempfile::tempdir().expect("create temp dir");
        touch(&temp.path().join("sub/m_float16.tflite"));
        let rules = RuleTable::from_pairs([("float16", "f16")]).unwrap();

        let mut report = ReorganizeReport::default();
        rename_artifacts(temp.path(), &rules, &mut report).expect("rename");

        assert!(temp.path().join("sub/m_f16.tflite").is_file());
        assert_eq!(report.renamed_count(), 1);
    }

    #[test]
    fn rename_conflict_leaves_tree_untouched() {
        let temp = tempfile::tempdir().expect("create temp dir");
        touch(&temp.path().join("m_float16.tflite"));
        touch(&temp.path().join("m_half.tflite"));
        let rules = RuleTable::from_pairs([("float16", "f16"), ("half", "f16")]).unwrap();

        let mut report = ReorganizeReport::default();
        let err = rename_artifacts(temp.path(), &rules, &mut report).unwrap_err();

        match err {
            StagehandError::RenameConflict {
                phase,
                name,
                sources,
            } => {
                assert_eq!(phase, Phase::Rename);
                assert_eq!(name, "m_f16.tflite");
                assert_eq!(sources.len(), 2);
            }
            other => panic!("expected RenameConflict, got {other:?}"),
        }
        assert!(temp.path().join("m_float16.tflite").is_file());
        assert!(temp.path().join("m_half.tflite").is_file());
        assert!(report.actions.is_empty());
    }

    #[test]
    fn rename_onto_unchanged_file_conflicts() {
        let temp = tempfile::tempdir().expect("create temp dir");
        touch(&temp.path().join("m_float16.tflite"));
        touch(&temp.path().join("m_f16.tflite"));
        let rules = RuleTable::from_pairs([("float16", "f16")]).unwrap();

        let mut report = ReorganizeReport::default();
        let err = rename_artifacts(temp.path(), &rules, &mut report).unwrap_err();
        assert!(matches!(err, StagehandError::RenameConflict { .. }));
    }

    #[test]
    fn rename_chain_waits_for_occupied_target() {
        let temp = tempfile::tempdir().expect("create temp dir");
        // "b" moves to "c" and frees the name that "a" is renamed to.
        touch(&temp.path().join("a"));
        touch(&temp.path().join("b"));
        let rules = RuleTable::from_pairs([("b", "c"), ("a", "b")]).unwrap();

        let mut report = ReorganizeReport::default();
        rename_artifacts(temp.path(), &rules, &mut report).expect("rename");

        assert!(temp.path().join("b").is_file());
        assert!(temp.path().join("c").is_file());
        assert!(!temp.path().join("a").exists());
        assert_eq!(report.renamed_count(), 2);
    }

    #[test]
    fn rename_to_empty_name_fails_before_moving_anything() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        touch(&root.join("m.tflite"));
        touch(&root.join("m_float16.tflite"));
        let rules = RuleTable::from_pairs([("float16", "f16"), ("m.tflite", "")]).unwrap();

        let mut report = ReorganizeReport::default();
        let err = rename_artifacts(&root, &rules, &mut report).unwrap_err();

        match err {
            StagehandError::InvalidRule(message) => assert!(message.contains("m.tflite")),
            other => panic!("expected InvalidRule, got {other:?}"),
        }
        assert!(root.join("m.tflite").is_file());
        assert!(root.join("m_float16.tflite").is_file());
        assert!(report.actions.is_empty());
    }

    #[test]
    fn rename_to_dot_dot_fails() {
        let temp = tempfile::tempdir().expect("create temp dir");
        touch(&temp.path().join("m.tflite"));
        // Each replacement is harmless alone; together they spell `..`.
        let rules = RuleTable::from_pairs([("m", "."), ("tflite", "")]).unwrap();

        let mut report = ReorganizeReport::default();
        let err = rename_artifacts(temp.path(), &rules, &mut report).unwrap_err();

        assert!(matches!(err, StagehandError::InvalidRule(_)));
        assert!(temp.path().join("m.tflite").is_file());
    }

    #[test]
    fn plain_file_names_are_single_components() {
        assert!(is_plain_file_name("f16.tflite"));
        assert!(is_plain_file_name("..f16"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name("."));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("a/b"));
    }

    #[test]
    fn publish_flattens_and_creates_destination() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        let dest = temp.path().join("out/models");
        touch(&root.join("f16.tflite"));
        touch(&root.join("nested/f32.tflite"));

        let mut report = ReorganizeReport::default();
        publish(&root, &dest, OnExisting::Overwrite, &mut report).expect("publish");

        assert!(dest.join("f16.tflite").is_file());
        assert!(dest.join("f32.tflite").is_file());
        assert!(root.join("nested/f32.tflite").is_file());
        assert_eq!(report.published_count(), 2);
    }

    #[test]
    fn publish_detects_flattening_collisions_before_copying() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        let dest = temp.path().join("models");
        touch(&root.join("a/f16.tflite"));
        touch(&root.join("b/f16.tflite"));
        touch(&root.join("a/f32.tflite"));

        let mut report = ReorganizeReport::default();
        let err = publish(&root, &dest, OnExisting::Overwrite, &mut report).unwrap_err();

        assert!(matches!(
            err,
            StagehandError::RenameConflict {
                phase: Phase::Publish,
                ..
            }
        ));
        assert!(!dest.exists());
    }

    #[test]
    fn cleanup_removes_root() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        touch(&root.join("x/y/z.tflite"));

        let mut report = ReorganizeReport::default();
        cleanup(&root, &mut report).expect("cleanup");

        assert!(!root.exists());
        assert_eq!(report.removed_file_count(), 1);
        assert_eq!(report.removed_dir_count(), 3);
        assert_eq!(report.actions.last().map(|a| a.path.as_path()), Some(root.as_path()));
    }

    #[test]
    fn destination_inside_staging_is_rejected() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        touch(&root.join("a.tflite"));
        let rules = RuleTable::from_pairs([("a", "b")]).unwrap();

        let err = reorganize(
            &root,
            &tflite(),
            &rules,
            &root.join("models"),
            &ReorganizeOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, StagehandError::DestinationInsideStaging { .. }));
        assert!(root.join("a.tflite").is_file());
    }

    #[test]
    fn destination_through_parent_dir_is_rejected() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        touch(&root.join("a.tflite"));

        let sneaky = temp.path().join("other/../stage/models");
        assert!(matches!(
            ensure_destination_outside(&root, &sneaky),
            Err(StagehandError::DestinationInsideStaging { .. })
        ));

        fs::create_dir_all(temp.path().join("other")).expect("create other");
        assert!(matches!(
            ensure_destination_outside(&root, &sneaky),
            Err(StagehandError::DestinationInsideStaging { .. })
        ));

        assert!(ensure_destination_outside(&root, &temp.path().join("stage_models")).is_ok());
        assert!(ensure_destination_outside(&root, &temp.path().join("models")).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn destination_through_symlink_is_rejected() {
        let temp = tempfile::tempdir().expect("create temp dir");
        let root = temp.path().join("stage");
        touch(&root.join("a.tflite"));
        let alias = temp.path().join("alias");
        std::os::unix::fs::symlink(&root, &alias).expect("create symlink");

        assert!(matches!(
            ensure_destination_outside(&root, &alias.join("models")),
            Err(StagehandError::DestinationInsideStaging { .. })
        ));
        assert!(matches!(
            ensure_destination_outside(&alias, &root.join("models")),
            Err(StagehandError::DestinationInsideStaging { .. })
        ));
    }
}
