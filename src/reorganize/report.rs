//! Report types recording what a reorganization run did.
//!
//! Every removal, rename, and copy becomes an [`Action`], in the order it
//! happened, so a run can be audited after the staging tree is gone.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Phase;

/// A record of one reorganization run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ReorganizeReport {
    /// The staging tree that was consumed.
    pub staging_root: PathBuf,
    /// Where artifacts were published.
    pub destination: PathBuf,
    /// Every filesystem mutation, in order.
    pub actions: Vec<Action>,
}

impl ReorganizeReport {
    pub fn new(staging_root: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            destination: destination.into(),
            actions: Vec::new(),
        }
    }

    /// Record an action.
    pub fn add(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Count of actions of one kind.
    pub fn count(&self, kind: ActionKind) -> usize {
        self.actions.iter().filter(|a| a.kind == kind).count()
    }

    /// Number of files copied into the destination.
    pub fn published_count(&self) -> usize {
        self.count(ActionKind::Copied)
    }

    pub fn renamed_count(&self) -> usize {
        self.count(ActionKind::Renamed)
    }

    pub fn removed_file_count(&self) -> usize {
        self.count(ActionKind::RemovedFile)
    }

    pub fn removed_dir_count(&self) -> usize {
        self.count(ActionKind::RemovedDir)
    }

    /// Destination paths of every published artifact.
    pub fn published(&self) -> impl Iterator<Item = &Path> {
        self.actions
            .iter()
            .filter(|a| a.kind == ActionKind::Copied)
            .filter_map(|a| a.target.as_deref())
    }
}

impl fmt::Display for ReorganizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Reorganized {} -> {}",
            self.staging_root.display(),
            self.destination.display()
        )?;
        writeln!(
            f,
            "  {} published, {} renamed, {} file(s) and {} dir(s) removed",
            self.published_count(),
            self.renamed_count(),
            self.removed_file_count(),
            self.removed_dir_count()
        )?;

        let published: Vec<_> = self.published().collect();
        if !published.is_empty() {
            writeln!(f)?;
            writeln!(f, "Published ({}):", published.len())?;
            for path in published {
                writeln!(f, "  - {}", path.display())?;
            }
        }

        Ok(())
    }
}

/// A single filesystem mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Action {
    pub phase: Phase,
    pub kind: ActionKind,
    pub path: PathBuf,
    /// New location for renames and copies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<PathBuf>,
}

impl Action {
    pub fn removed_file(phase: Phase, path: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            kind: ActionKind::RemovedFile,
            path: path.into(),
            target: None,
        }
    }

    pub fn removed_dir(phase: Phase, path: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            kind: ActionKind::RemovedDir,
            path: path.into(),
            target: None,
        }
    }

    pub fn renamed(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            phase: Phase::Rename,
            kind: ActionKind::Renamed,
            path: from.into(),
            target: Some(to.into()),
        }
    }

    pub fn copied(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
        Self {
            phase: Phase::Publish,
            kind: ActionKind::Copied,
            path: from.into(),
            target: Some(to.into()),
        }
    }
}

/// What kind of mutation an [`Action`] was.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RemovedFile,
    RemovedDir,
    Renamed,
    Copied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_by_kind() {
        let mut report = ReorganizeReport::new("stage", "models");
        report.add(Action::removed_file(Phase::Prune, "stage/a.onnx"));
        report.add(Action::removed_dir(Phase::Prune, "stage/assets"));
        report.add(Action::renamed("stage/a_float16.tflite", "stage/a_f16.tflite"));
        report.add(Action::copied("stage/a_f16.tflite", "models/a_f16.tflite"));

        assert_eq!(report.removed_file_count(), 1);
        assert_eq!(report.removed_dir_count(), 1);
        assert_eq!(report.renamed_count(), 1);
        assert_eq!(report.published_count(), 1);
        assert_eq!(
            report.published().collect::<Vec<_>>(),
            vec![Path::new("models/a_f16.tflite")]
        );
    }

    #[test]
    fn display_lists_published_artifacts() {
        let mut report = ReorganizeReport::new("stage", "models");
        report.add(Action::copied("stage/f16.tflite", "models/f16.tflite"));

        let text = report.to_string();
        assert!(text.contains("1 published"));
        assert!(text.contains("Published (1):"));
        assert!(text.contains("models/f16.tflite"));
    }

    #[test]
    fn report_serializes_to_json() {
        let mut report = ReorganizeReport::new("stage", "models");
        report.add(Action::removed_file(Phase::Cleanup, "stage/x"));

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"phase\":\"cleanup\""));
        assert!(json.contains("\"kind\":\"removed_file\""));
        assert!(!json.contains("\"target\""));
    }
}
