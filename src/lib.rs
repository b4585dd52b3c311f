//! Stagehand: post-export artifact reorganizer.
//!
//! Model exporters leave a nested staging tree of mixed-format files with
//! verbose names. Stagehand keeps only the wanted format, renames the
//! survivors to short canonical names, publishes them into a flat
//! destination directory, and removes the staging tree.
//!
//! # Modules
//!
//! - [`reorganize`]: The prune / rename / publish / cleanup pipeline
//! - [`rules`]: Rename rules and the default quantization table
//! - [`layout`]: Paths shared with the exporter and NPU converter
//! - [`config`]: Optional YAML configuration
//! - [`npu`]: NPU conversion planning and workspace preparation
//! - [`error`]: Error types for stagehand operations

pub mod config;
pub mod error;
pub mod layout;
pub mod npu;
pub mod reorganize;
pub mod rules;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

pub use error::{Phase, StagehandError};
pub use reorganize::{
    reorganize, OnExisting, ReorganizeOptions, ReorganizeReport, RetainedExtension,
};
pub use rules::{RenameRule, RuleTable};

use config::ConfigFile;
use layout::{ExportLayout, Workspace, TFLITE_EXTENSION};
use npu::{ModelKind, NpuPlan};

/// The stagehand CLI application.
#[derive(Parser)]
#[command(name = "stagehand")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Prune, rename, and publish the artifacts of a staging directory.
    Reorganize(ReorganizeArgs),
    /// Collect a model's TFLite export into `<working-dir>/models`.
    Collect(CollectArgs),
    /// Print the default rename rules for a model.
    Rules(RulesArgs),
    /// Plan NPU conversion jobs for published artifacts.
    NpuPlan(NpuPlanArgs),
}

/// Arguments for the reorganize subcommand.
#[derive(clap::Args)]
struct ReorganizeArgs {
    /// Staging directory written by the exporter.
    staging: PathBuf,

    /// Destination directory for canonical artifacts.
    #[arg(long)]
    dest: Option<PathBuf>,

    /// File extension to keep (default '.tflite').
    #[arg(long)]
    extension: Option<String>,

    /// Rename rule, applied in the order given.
    #[arg(long = "rule", value_name = "PATTERN=REPLACEMENT")]
    rules: Vec<String>,

    /// What to do when a published name already exists ('overwrite' or 'refuse').
    #[arg(long)]
    on_existing: Option<String>,

    /// YAML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format for the report ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Arguments for the collect subcommand.
#[derive(clap::Args)]
struct CollectArgs {
    /// Model file name the export was made from (e.g. 'yolov5n.pt').
    #[arg(long)]
    model: String,

    /// Directory the exporter ran in.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,

    /// YAML config file (defaults to '<working-dir>/stagehand.yaml' if present).
    #[arg(long)]
    config: Option<PathBuf>,

    /// What to do when a published name already exists ('overwrite' or 'refuse').
    #[arg(long)]
    on_existing: Option<String>,

    /// Output format for the report ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Arguments for the rules subcommand.
#[derive(clap::Args)]
struct RulesArgs {
    /// Model file name (e.g. 'yolov5n.pt').
    #[arg(long)]
    model: String,

    /// Output format ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Arguments for the npu-plan subcommand.
#[derive(clap::Args)]
struct NpuPlanArgs {
    /// Directory holding 'models/' and 'export/'.
    #[arg(long, default_value = ".")]
    working_dir: PathBuf,

    /// Converter input format ('tflite' or 'onnx').
    #[arg(long, default_value = "tflite")]
    model_kind: String,

    /// Target NPU platform.
    #[arg(long, default_value = npu::DEFAULT_TARGET_PLATFORM)]
    target: String,

    /// Create missing directories and the calibration list.
    #[arg(long)]
    prepare: bool,

    /// Calibration image list (defaults to '<working-dir>/dataset.txt').
    #[arg(long)]
    calibration_list: Option<PathBuf>,

    /// Output format ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

/// Run the stagehand CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), StagehandError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Reorganize(args)) => run_reorganize(args),
        Some(Commands::Collect(args)) => run_collect(args),
        Some(Commands::Rules(args)) => run_rules(args),
        Some(Commands::NpuPlan(args)) => run_npu_plan(args),
        None => {
            println!("stagehand {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Post-export artifact reorganizer.");
            println!();
            println!("Run 'stagehand --help' for usage information.");
            Ok(())
        }
    }
}

/// Execute the reorganize subcommand.
fn run_reorganize(args: ReorganizeArgs) -> Result<(), StagehandError> {
    let output = OutputFormat::parse(&args.output)?;
    let config = args
        .config
        .as_deref()
        .map(config::load_config_file)
        .transpose()?
        .unwrap_or_default();

    let rules = if args.rules.is_empty() {
        config.rule_table().ok_or(StagehandError::EmptyRuleTable)?
    } else {
        let parsed = args
            .rules
            .iter()
            .map(String::as_str)
            .map(rules::parse_rule)
            .collect::<Result<Vec<_>, _>>()?;
        RuleTable::new(parsed)?
    };

    let destination = args
        .dest
        .or_else(|| config.destination.clone())
        .ok_or_else(|| {
            StagehandError::MissingSetting(
                "destination (pass --dest or set it in the config file)".to_string(),
            )
        })?;

    let extension = resolve_extension(args.extension.as_deref(), &config)?;
    let options = resolve_options(args.on_existing.as_deref(), &config)?;

    let report = reorganize(&args.staging, &extension, &rules, &destination, &options)?;
    emit(&report, output)
}

/// Execute the collect subcommand.
///
/// Mirrors the export driver: the staging tree and rules are derived from
/// the model name unless the config file overrides them.
fn run_collect(args: CollectArgs) -> Result<(), StagehandError> {
    let output = OutputFormat::parse(&args.output)?;
    let layout = ExportLayout::new(&args.working_dir, &args.model)?;
    let config = config::load_config(args.config.as_deref(), &args.working_dir)?.unwrap_or_default();

    let staging = layout
        .find_staging_dir()
        .ok_or_else(|| StagehandError::NotFound {
            phase: Phase::Discover,
            path: layout.staging_root.clone(),
        })?;

    let rules = match config.rule_table() {
        Some(table) => table,
        None => layout.rules()?,
    };
    let destination = config
        .destination
        .clone()
        .unwrap_or_else(|| layout.workspace.destination.clone());
    let extension = resolve_extension(None, &config)?;
    let options = resolve_options(args.on_existing.as_deref(), &config)?;

    let report = reorganize(staging, &extension, &rules, &destination, &options)?;
    emit(&report, output)
}

/// Execute the rules subcommand.
fn run_rules(args: RulesArgs) -> Result<(), StagehandError> {
    let output = OutputFormat::parse(&args.output)?;
    let layout = ExportLayout::new(".", &args.model)?;
    let table = layout.rules()?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
        OutputFormat::Text => {
            println!("Rename rules for '{}':", layout.model_stem);
            print!("{}", table);
        }
    }
    Ok(())
}

/// Execute the npu-plan subcommand.
fn run_npu_plan(args: NpuPlanArgs) -> Result<(), StagehandError> {
    let output = OutputFormat::parse(&args.output)?;
    let kind = match args.model_kind.as_str() {
        "tflite" => ModelKind::Tflite,
        "onnx" => ModelKind::Onnx,
        other => {
            return Err(StagehandError::UnsupportedFormat(format!(
                "'{}' (supported: tflite, onnx)",
                other
            )));
        }
    };

    let workspace = Workspace::new(&args.working_dir);
    let prepared = if args.prepare {
        let calibration_list = args
            .calibration_list
            .unwrap_or_else(|| args.working_dir.join(npu::DEFAULT_CALIBRATION_LIST));
        Some(npu::prepare_workspace(&workspace, &calibration_list)?)
    } else {
        None
    };

    let plan = NpuPlan {
        prepared,
        jobs: npu::plan_jobs(&workspace, kind, &args.target),
    };
    emit(&plan, output)
}

/// Report output format shared by every subcommand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Result<Self, StagehandError> {
        match value {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(StagehandError::UnsupportedFormat(format!(
                "'{}' (supported: text, json)",
                other
            ))),
        }
    }
}

fn emit<T>(report: &T, output: OutputFormat) -> Result<(), StagehandError>
where
    T: Serialize + std::fmt::Display,
{
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Text => print!("{}", report),
    }
    Ok(())
}

fn resolve_extension(
    flag: Option<&str>,
    config: &ConfigFile,
) -> Result<RetainedExtension, StagehandError> {
    let value = flag
        .or(config.retained_extension.as_deref())
        .unwrap_or(TFLITE_EXTENSION);
    RetainedExtension::new(value)
}

fn resolve_options(
    flag: Option<&str>,
    config: &ConfigFile,
) -> Result<ReorganizeOptions, StagehandError> {
    let on_existing = match flag {
        Some("overwrite") => OnExisting::Overwrite,
        Some("refuse") => OnExisting::Refuse,
        Some(other) => {
            return Err(StagehandError::UnsupportedFormat(format!(
                "on-existing policy '{}' (supported: overwrite, refuse)",
                other
            )));
        }
        None => config.on_existing.unwrap_or_default(),
    };
    Ok(ReorganizeOptions { on_existing })
}
