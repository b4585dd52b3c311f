use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// The stage of a run in which an operation happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading configuration.
    Configure,
    /// Locating the staging tree.
    Discover,
    /// Removing everything that is not the retained format.
    Prune,
    /// Canonicalizing file names in place.
    Rename,
    /// Copying artifacts into the destination.
    Publish,
    /// Removing the staging tree.
    Cleanup,
    /// Creating workspace directories and files for NPU conversion.
    Prepare,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Configure => "configure",
            Phase::Discover => "discover",
            Phase::Prune => "prune",
            Phase::Rename => "rename",
            Phase::Publish => "publish",
            Phase::Cleanup => "cleanup",
            Phase::Prepare => "prepare",
        };
        f.write_str(name)
    }
}

/// The main error type for stagehand operations.
#[derive(Debug, Error)]
pub enum StagehandError {
    #[error("{phase}: staging directory not found: {path}")]
    NotFound { phase: Phase, path: PathBuf },

    #[error("{phase}: permission denied at {path}: {source}")]
    PermissionDenied {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{phase}: IO error at {path}: {source}")]
    Io {
        phase: Phase,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{phase}: rename conflict on '{name}' (from {})", display_paths(.sources))]
    RenameConflict {
        phase: Phase,
        name: String,
        sources: Vec<PathBuf>,
    },

    #[error("Destination {destination} is inside staging directory {staging_root}")]
    DestinationInsideStaging {
        destination: PathBuf,
        staging_root: PathBuf,
    },

    #[error("Invalid rename rule: {0}")]
    InvalidRule(String),

    #[error("Rename rule table is empty")]
    EmptyRuleTable,

    #[error("Retained extension must not be empty")]
    EmptyExtension,

    #[error("Missing setting: {0}")]
    MissingSetting(String),

    #[error("Invalid model name: {0}")]
    InvalidModelName(String),

    #[error("Failed to parse config from {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to write report: {0}")]
    ReportWrite(#[from] serde_json::Error),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl StagehandError {
    /// Wraps an IO error with the phase and path it happened at.
    ///
    /// Permission failures get their own variant so callers can tell a
    /// locked-down tree apart from a broken one.
    pub fn io(phase: Phase, path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match source.kind() {
            io::ErrorKind::PermissionDenied => StagehandError::PermissionDenied {
                phase,
                path,
                source,
            },
            _ => StagehandError::Io {
                phase,
                path,
                source,
            },
        }
    }

    /// The phase the error happened in, if it came from a filesystem run.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            StagehandError::NotFound { phase, .. }
            | StagehandError::PermissionDenied { phase, .. }
            | StagehandError::Io { phase, .. }
            | StagehandError::RenameConflict { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
