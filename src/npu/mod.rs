//! Planning for the NPU conversion stage.
//!
//! The vendor converter itself runs outside stagehand. This module decides
//! what it should be fed: one job per published quantization variant, with
//! the quantization flag and normalization values the converter expects.
//! It can also prepare the workspace the converter reads from and writes to.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::error::{Phase, StagehandError};
use crate::layout::Workspace;
use crate::rules::QUANTIZATION_VARIANTS;

/// Default target platform for the converter.
pub const DEFAULT_TARGET_PLATFORM: &str = "rk3588";
/// Default calibration image list, relative to the working directory.
pub const DEFAULT_CALIBRATION_LIST: &str = "dataset.txt";
/// Written to a calibration list that does not exist yet.
pub const DEFAULT_CALIBRATION_CONTENT: &str = "./bus.jpg\n";

/// Per-variant quantization, aligned with [`QUANTIZATION_VARIANTS`].
///
/// Float variants are quantized by the converter; variants that the
/// exporter already quantized are passed through.
const QUANTIZE: [bool; 5] = [true, true, false, false, false];

const MEAN_VALUES: [f32; 3] = [0.0, 0.0, 0.0];
const STD_VALUES: [f32; 3] = [255.0, 255.0, 255.0];

/// Input format fed to the converter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Tflite,
    Onnx,
}

impl ModelKind {
    pub fn extension(&self) -> &'static str {
        match self {
            ModelKind::Tflite => "tflite",
            ModelKind::Onnx => "onnx",
        }
    }
}

/// One conversion the converter should run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NpuJob {
    /// Short code of the variant (`f16`, `iq`, ...).
    pub code: String,
    pub kind: ModelKind,
    pub input: PathBuf,
    pub output: PathBuf,
    pub quantize: bool,
    pub mean_values: [f32; 3],
    pub std_values: [f32; 3],
    pub target_platform: String,
}

impl fmt::Display for NpuJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} [{}, quantize={}]",
            self.input.display(),
            self.output.display(),
            self.target_platform,
            self.quantize
        )
    }
}

/// One conversion job per quantization variant, in the default table order.
///
/// Inputs are read from the publish destination and outputs are named
/// `<code>.rknn` in the NPU output directory.
pub fn plan_jobs(workspace: &Workspace, kind: ModelKind, target_platform: &str) -> Vec<NpuJob> {
    QUANTIZATION_VARIANTS
        .iter()
        .zip(QUANTIZE)
        .map(|((_, code), quantize)| NpuJob {
            code: code.to_string(),
            kind,
            input: workspace
                .destination
                .join(format!("{code}.{}", kind.extension())),
            output: workspace.npu_output.join(format!("{code}.rknn")),
            quantize,
            mean_values: MEAN_VALUES,
            std_values: STD_VALUES,
            target_platform: target_platform.to_string(),
        })
        .collect()
}

/// What [`prepare_workspace`] had to create.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PreparedWorkspace {
    pub created_dirs: Vec<PathBuf>,
    pub created_calibration_list: Option<PathBuf>,
}

impl PreparedWorkspace {
    pub fn is_empty(&self) -> bool {
        self.created_dirs.is_empty() && self.created_calibration_list.is_none()
    }
}

impl fmt::Display for PreparedWorkspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return writeln!(f, "Workspace already prepared");
        }
        for dir in &self.created_dirs {
            writeln!(f, "Created directory: {}", dir.display())?;
        }
        if let Some(list) = &self.created_calibration_list {
            writeln!(f, "Created calibration list: {}", list.display())?;
        }
        Ok(())
    }
}

/// The jobs to run, and what was prepared for them if preparation was asked.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NpuPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepared: Option<PreparedWorkspace>,
    pub jobs: Vec<NpuJob>,
}

impl fmt::Display for NpuPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prepared) = &self.prepared {
            write!(f, "{}", prepared)?;
        }
        writeln!(f, "NPU conversion plan ({} job(s)):", self.jobs.len())?;
        for job in &self.jobs {
            writeln!(f, "  - {}", job)?;
        }
        Ok(())
    }
}

/// Create the publish and NPU output directories and a default calibration
/// list, leaving anything that already exists alone.
pub fn prepare_workspace(
    workspace: &Workspace,
    calibration_list: &Path,
) -> Result<PreparedWorkspace, StagehandError> {
    let mut prepared = PreparedWorkspace::default();

    for dir in [&workspace.destination, &workspace.npu_output] {
        if dir.is_dir() {
            info!("Directory '{}' already exists", dir.display());
            continue;
        }
        fs::create_dir_all(dir).map_err(|e| StagehandError::io(Phase::Prepare, dir, e))?;
        info!("Directory '{}' did not exist and was created", dir.display());
        prepared.created_dirs.push(dir.clone());
    }

    if calibration_list.is_file() {
        info!("File '{}' already exists", calibration_list.display());
    } else {
        fs::write(calibration_list, DEFAULT_CALIBRATION_CONTENT)
            .map_err(|e| StagehandError::io(Phase::Prepare, calibration_list, e))?;
        info!(
            "File '{}' did not exist and was created",
            calibration_list.display()
        );
        prepared.created_calibration_list = Some(calibration_list.to_path_buf());
    }

    Ok(prepared)
}
