//! Load a pipeline file (`scorepipe.toml` by default): global settings plus an ordered stage list.
//!
//! Relative paths inside the file are resolved against the file's own directory.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::pipeline::walk::EmptyDirPolicy;
use crate::utils::config::PackagePaths;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PipelineToml {
    #[serde(default)]
    settings: SettingsSection,
    #[serde(default, rename = "stage")]
    stages: Vec<StageSpec>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    results_dir: Option<PathBuf>,
    software_dir: Option<PathBuf>,
    workers: Option<usize>,
    verbose: Option<bool>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Copy every file to its mapped destination (task runner).
    Copy,
    /// Run an external command per file (task runner plans, supervisor runs).
    Command,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationKind {
    #[default]
    Threads,
    Processes,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitKind {
    #[default]
    Events,
    Poll,
}

/// One `[[stage]]` table.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageSpec {
    pub name: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub kind: StageKind,
    /// Required: what to do with source folders that hold no files.
    pub empty_dirs: EmptyDirPolicy,
    #[serde(default)]
    pub output_exist_ok: bool,
    #[serde(default)]
    pub folder_exist_ok: bool,
    #[serde(default)]
    pub file_exist_ok: bool,
    pub from_ext: Option<String>,
    pub to_ext: Option<String>,
    /// Resolved under the software directory and checked before any stage runs.
    pub executable: Option<PathBuf>,
    /// Template appended to the executable path, e.g. `"-f {} -o {}"`.
    pub command: Option<String>,
    pub max_retries: Option<u32>,
    pub tick_ms: Option<u64>,
    pub workers: Option<usize>,
    #[serde(default)]
    pub print_stdout: bool,
    #[serde(default)]
    pub print_stderr: bool,
    /// Write each job's stdout to its output path.
    #[serde(default)]
    pub stdout_to_file: bool,
    #[serde(default)]
    pub isolation: IsolationKind,
    #[serde(default)]
    pub wait: WaitKind,
}

impl StageSpec {
    /// Reject option combinations that contradict each other.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| PipelineError::config(format!("[{}] {}", self.name, msg));
        match self.kind {
            StageKind::Command if self.command.is_none() => {
                return Err(fail("command stage needs `command`"));
            }
            StageKind::Copy if self.command.is_some() || self.executable.is_some() => {
                return Err(fail("copy stage takes no `command` or `executable`"));
            }
            StageKind::Copy if self.stdout_to_file => {
                return Err(fail("`stdout_to_file` only applies to command stages"));
            }
            _ => {}
        }
        if self.from_ext.is_some() != self.to_ext.is_some() {
            return Err(fail("`from_ext` and `to_ext` must be given together"));
        }
        if self.workers == Some(0) {
            return Err(fail("`workers` must be at least 1"));
        }
        Ok(())
    }
}

/// Resolved pipeline: file values with CLI overrides applied.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub results_dir: PathBuf,
    pub software_dir: PathBuf,
    pub workers: Option<usize>,
    pub verbose: bool,
    pub stages: Vec<StageSpec>,
}

/// Values given on the command line; each one present wins over the file.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub results_dir: Option<PathBuf>,
    pub software_dir: Option<PathBuf>,
    pub workers: Option<usize>,
    pub verbose: Option<bool>,
}

/// Overwrite config field from CLI when present.
macro_rules! apply_cli_opt {
    ($cli:expr, $cfg:expr, $field:ident) => {
        if let Some(v) = $cli.$field.clone() {
            $cfg.$field = v;
        }
    };
}

impl PipelineConfig {
    pub fn apply_overrides(&mut self, cli: &CliOverrides) {
        apply_cli_opt!(cli, self, results_dir);
        apply_cli_opt!(cli, self, software_dir);
        apply_cli_opt!(cli, self, verbose);
        if cli.workers.is_some() {
            self.workers = cli.workers;
        }
    }
}

fn resolve(base: &Path, p: PathBuf) -> PathBuf {
    if p.is_absolute() { p } else { base.join(p) }
}

/// Parse pipeline TOML text. `base` anchors relative paths.
pub fn parse_pipeline(text: &str, base: &Path) -> Result<PipelineConfig> {
    let file: PipelineToml = toml::from_str(text)
        .map_err(|e| PipelineError::config(format!("invalid pipeline file: {e}")))?;
    let settings = file.settings;
    let stages: Vec<StageSpec> = file
        .stages
        .into_iter()
        .map(|mut s| {
            s.input = resolve(base, s.input);
            s.output = resolve(base, s.output);
            s
        })
        .collect();
    if stages.is_empty() {
        return Err(PipelineError::config("pipeline file declares no [[stage]]"));
    }
    for (i, s) in stages.iter().enumerate() {
        s.validate()?;
        if stages[..i].iter().any(|prev| prev.name == s.name) {
            return Err(PipelineError::config(format!(
                "duplicate stage name `{}`",
                s.name
            )));
        }
    }
    Ok(PipelineConfig {
        results_dir: resolve(
            base,
            settings
                .results_dir
                .unwrap_or_else(|| PathBuf::from(PackagePaths::RESULTS_DIR)),
        ),
        software_dir: resolve(
            base,
            settings
                .software_dir
                .unwrap_or_else(|| PathBuf::from(PackagePaths::SOFTWARE_DIR)),
        ),
        workers: settings.workers,
        verbose: settings.verbose.unwrap_or(false),
        stages,
    })
}

/// Load the pipeline file at `path`.
pub fn load_pipeline(path: &Path) -> Result<PipelineConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| PipelineError::config_at("pipeline file not readable", path))?;
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    parse_pipeline(&text, base)
}
