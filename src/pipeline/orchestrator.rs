//! Pipeline driver: run an ordered list of stages loaded from a pipeline file.
//!
//! Every selected stage is checked up front (input roots, output roots, executables). The first
//! contract violation fails the whole run before anything is created.

use log::{debug, info};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::stage::Stage;
use super::task_runner::{Isolation, ResultMode, TaskOpts, WorkerCommand};
use super::work::CopyFile;
use crate::engine::supervisor::{SupervisorOpts, WaitStrategy};
use crate::engine::template::quote_program;
use crate::engine::tools::{PathMapper, verify_executable};
use crate::error::{PipelineError, Result};
use crate::utils::config::SupervisorConsts;
use crate::utils::pipeline_toml::{IsolationKind, PipelineConfig, StageKind, StageSpec, WaitKind};

/// What one stage did.
#[derive(Clone, Debug)]
pub struct StageSummary {
    pub name: String,
    pub kind: StageKind,
    /// Units (copy) or jobs (command) handed to the engine.
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub manifest_path: Option<PathBuf>,
}

impl StageSummary {
    /// What the counts refer to: work units for copy stages, jobs for command stages.
    pub fn unit_label(&self) -> &'static str {
        match self.kind {
            StageKind::Copy => "unit(s)",
            StageKind::Command => "job(s)",
        }
    }
}

/// Stages named in `only`, in file order. Empty `only` selects every stage.
pub fn select_stages<'a>(cfg: &'a PipelineConfig, only: &[String]) -> Result<Vec<&'a StageSpec>> {
    if let Some(unknown) = only
        .iter()
        .find(|name| !cfg.stages.iter().any(|s| &s.name == *name))
    {
        return Err(PipelineError::config(format!("unknown stage `{unknown}`")));
    }
    Ok(cfg
        .stages
        .iter()
        .filter(|s| only.is_empty() || only.contains(&s.name))
        .collect())
}

fn mapper_for(spec: &StageSpec) -> PathMapper {
    match (&spec.from_ext, &spec.to_ext) {
        (Some(from), Some(to)) => PathMapper::swap_extension(from.as_str(), to.as_str()),
        _ => PathMapper::KeepName,
    }
}

/// Executable path quoted for the shell and escaped for use as the head of a command template.
fn template_for(exe: &Path, command: &str) -> String {
    let exe = quote_program(&exe.to_string_lossy())
        .replace('{', "{{")
        .replace('}', "}}");
    format!("{exe} {command}")
}

/// Pre-flight for `stages`: no filesystem mutation.
///
/// An input root may be missing when an earlier stage in the list produces it.
pub fn check_stages(cfg: &PipelineConfig, stages: &[&StageSpec]) -> Result<()> {
    let mut produced: Vec<&Path> = Vec::new();
    for spec in stages {
        if produced.contains(&spec.input.as_path()) {
            if !spec.output_exist_ok && spec.output.exists() {
                return Err(PipelineError::config_at(
                    format!("[{}] target directory already exists", spec.name),
                    &spec.output,
                ));
            }
        } else {
            Stage::check(&spec.name, &spec.input, &spec.output, spec.output_exist_ok)?;
        }
        if let Some(exe) = &spec.executable {
            verify_executable(&cfg.software_dir, exe)?;
        }
        debug!("[{}] Pre-flight passed.", spec.name);
        produced.push(&spec.output);
    }
    Ok(())
}

/// Pre-flight every stage of the pipeline.
pub fn check_pipeline(cfg: &PipelineConfig) -> Result<()> {
    let stages = select_stages(cfg, &[])?;
    check_stages(cfg, &stages)
}

fn task_opts(cfg: &PipelineConfig, spec: &StageSpec) -> Result<TaskOpts> {
    let isolation = match spec.isolation {
        IsolationKind::Threads => Isolation::Threads,
        IsolationKind::Processes => Isolation::Processes(WorkerCommand::current_exe()?),
    };
    Ok(TaskOpts {
        workers: spec.workers.or(cfg.workers),
        folder_exist_ok: spec.folder_exist_ok,
        file_exist_ok: spec.file_exist_ok,
        isolation,
        results: ResultMode::Discard,
        progress_bar: !cfg.verbose && std::io::stderr().is_terminal(),
        results_dir: Some(cfg.results_dir.clone()),
        ..TaskOpts::new(spec.empty_dirs)
    })
}

fn supervisor_opts(cfg: &PipelineConfig, spec: &StageSpec) -> SupervisorOpts {
    SupervisorOpts {
        pool_size: spec.workers.or(cfg.workers),
        max_retry_count: spec.max_retries.unwrap_or(SupervisorConsts::MAX_RETRY_COUNT),
        tick: spec
            .tick_ms
            .map(Duration::from_millis)
            .unwrap_or(SupervisorConsts::TICK),
        capture_stdout: spec.print_stdout,
        capture_stderr: spec.print_stderr,
        stdout_to_payload: spec.stdout_to_file.then_some(1),
        wait: match spec.wait {
            WaitKind::Events => WaitStrategy::Events,
            WaitKind::Poll => WaitStrategy::Poll,
        },
        results_dir: Some(cfg.results_dir.clone()),
        ..SupervisorOpts::default()
    }
}

fn run_stage(cfg: &PipelineConfig, spec: &StageSpec) -> Result<StageSummary> {
    let stage = Stage::new(&spec.name, &spec.input, &spec.output, spec.output_exist_ok)?
        .with_results_dir(&cfg.results_dir);
    let mapper = mapper_for(spec);
    Ok(match spec.kind {
        StageKind::Copy => {
            let report = stage.run_tasks(&CopyFile, &mapper, &task_opts(cfg, spec)?)?;
            StageSummary {
                name: spec.name.clone(),
                kind: spec.kind,
                dispatched: report.dispatched,
                succeeded: report.succeeded(),
                failed: report.failures.len(),
                manifest_path: report.manifest_path,
            }
        }
        StageKind::Command => {
            let exe = spec
                .executable
                .as_deref()
                .map(|e| verify_executable(&cfg.software_dir, e))
                .transpose()?;
            let command = spec.command.as_deref().unwrap_or_default();
            let template = match &exe {
                Some(exe) => template_for(exe, command),
                None => command.to_string(),
            };
            // Planning only records (src, dst) pairs; it never needs a worker process.
            let plan_opts = TaskOpts {
                isolation: Isolation::Threads,
                progress_bar: false,
                ..task_opts(cfg, spec)?
            };
            let report = stage.run_commands_over_tree(
                &template,
                &mapper,
                &plan_opts,
                &supervisor_opts(cfg, spec),
            )?;
            StageSummary {
                name: spec.name.clone(),
                kind: spec.kind,
                dispatched: report.run.submitted,
                succeeded: report.run.succeeded,
                failed: report.failed(),
                manifest_path: report.manifest_path,
            }
        }
    })
}

/// Run the stages named in `only` (all when empty) in file order.
///
/// Job and unit failures are reported per stage and never stop the pipeline; configuration
/// problems stop it immediately.
pub fn run_pipeline(cfg: &PipelineConfig, only: &[String]) -> Result<Vec<StageSummary>> {
    let stages = select_stages(cfg, only)?;
    check_stages(cfg, &stages)?;
    info!("Running {} stage(s).", stages.len());
    stages.into_iter().map(|spec| run_stage(cfg, spec)).collect()
}
