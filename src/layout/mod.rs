//! On-disk layout shared with the exporter and the NPU converter.
//!
//! The exporter writes its TFLite output to `<working_dir>/<stem>_saved_model`,
//! where `<stem>` is the model file name minus its 3-character `.pt` suffix.
//! These names are an external contract and must match exactly.

use std::path::{Path, PathBuf};

use crate::error::StagehandError;
use crate::rules::{quantization_rules, RuleTable};

/// Marker appended to the model stem by the exporter.
pub const STAGING_SUFFIX: &str = "_saved_model";
/// Directory that accumulates canonical artifacts.
pub const DESTINATION_DIR: &str = "models";
/// Directory that receives NPU conversion output.
pub const NPU_OUTPUT_DIR: &str = "export";
/// Extension kept when collecting a TFLite export.
pub const TFLITE_EXTENSION: &str = ".tflite";

const MODEL_SUFFIX_LEN: usize = 3;

/// Strips the fixed 3-character suffix (`.pt`) from a model name.
pub fn model_stem(model_name: &str) -> Result<&str, StagehandError> {
    let cut = model_name
        .char_indices()
        .rev()
        .nth(MODEL_SUFFIX_LEN - 1)
        .map(|(idx, _)| idx)
        .filter(|&idx| idx > 0)
        .ok_or_else(|| {
            StagehandError::InvalidModelName(format!(
                "'{}' is too short to carry a {}-character suffix",
                model_name, MODEL_SUFFIX_LEN
            ))
        })?;
    Ok(&model_name[..cut])
}

/// Directories shared by every model exported from one working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Workspace {
    pub working_dir: PathBuf,
    /// Where canonical artifacts are published.
    pub destination: PathBuf,
    /// Where the NPU converter writes its output.
    pub npu_output: PathBuf,
}

impl Workspace {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        Self {
            destination: working_dir.join(DESTINATION_DIR),
            npu_output: working_dir.join(NPU_OUTPUT_DIR),
            working_dir,
        }
    }
}

/// Resolved paths for one model's export run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportLayout {
    pub workspace: Workspace,
    pub model_stem: String,
    pub staging_root: PathBuf,
}

impl ExportLayout {
    pub fn new(working_dir: impl Into<PathBuf>, model_name: &str) -> Result<Self, StagehandError> {
        let workspace = Workspace::new(working_dir);
        let stem = model_stem(model_name)?;

        Ok(Self {
            staging_root: workspace
                .working_dir
                .join(format!("{stem}{STAGING_SUFFIX}")),
            model_stem: stem.to_string(),
            workspace,
        })
    }

    /// Returns the staging root if the exporter left it behind.
    pub fn find_staging_dir(&self) -> Option<&Path> {
        self.staging_root
            .is_dir()
            .then_some(self.staging_root.as_path())
    }

    /// Default rule table for this model's quantization variants.
    pub fn rules(&self) -> Result<RuleTable, StagehandError> {
        quantization_rules(&self.model_stem)
    }
}
