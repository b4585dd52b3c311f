//! Optional YAML configuration for reorganization runs.
//!
//! Sources, highest priority first:
//! 1. Command-line flags
//! 2. Config file (`--config`, or `stagehand.yaml` in the working directory)
//! 3. Built-in defaults
//!
//! A relative `destination` in the file is resolved against the file's
//! parent directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Phase, StagehandError};
use crate::reorganize::OnExisting;
use crate::rules::{RenameRule, RuleTable};

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "stagehand.yaml";

/// Config file schema (matches the YAML structure).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub retained_extension: Option<String>,
    pub destination: Option<PathBuf>,
    pub on_existing: Option<OnExisting>,
    #[serde(default)]
    pub rules: Vec<RenameRule>,
}

impl ConfigFile {
    /// The configured rule table, if the file declares any rules.
    pub fn rule_table(&self) -> Option<RuleTable> {
        RuleTable::new(self.rules.clone()).ok()
    }
}

/// Parse a config document. `origin` is only used for error messages.
pub fn parse_config(yaml: &str, origin: &Path) -> Result<ConfigFile, StagehandError> {
    serde_yaml::from_str(yaml).map_err(|source| StagehandError::ConfigParse {
        path: origin.to_path_buf(),
        source,
    })
}

/// Load a config file and resolve its relative paths.
pub fn load_config_file(path: &Path) -> Result<ConfigFile, StagehandError> {
    let content =
        fs::read_to_string(path).map_err(|e| StagehandError::io(Phase::Configure, path, e))?;
    let mut config = parse_config(&content, path)?;

    if let Some(dest) = config.destination.take() {
        let base = path.parent().unwrap_or(Path::new("."));
        config.destination = Some(if dest.is_absolute() {
            dest
        } else {
            base.join(dest)
        });
    }

    Ok(config)
}

/// Load `path` if given, else `<working_dir>/stagehand.yaml` if it exists.
pub fn load_config(
    path: Option<&Path>,
    working_dir: &Path,
) -> Result<Option<ConfigFile>, StagehandError> {
    match path {
        Some(path) => load_config_file(path).map(Some),
        None => {
            let candidate = working_dir.join(DEFAULT_CONFIG_FILE);
            if candidate.is_file() {
                load_config_file(&candidate).map(Some)
            } else {
                Ok(None)
            }
        }
    }
}
