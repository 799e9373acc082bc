//! Stage handle: a named step with an input root and an output root.
//!
//! Constructing a [`Stage`] enforces the directory contract (input exists, output does not unless
//! allowed) before anything is created, then creates the output root. Stages share nothing except
//! the convention that one stage's output root is the next one's input root.

use log::info;
use std::path::{Path, PathBuf};

use super::task_runner::{ResultMode, TaskOpts, run_tasks};
use super::work::{PlanJob, Work};
use crate::engine::manifest::write_manifest;
use crate::engine::supervisor::{SupervisorOpts, run_pool};
use crate::engine::tools::{PathMapper, absolute};
use crate::error::{PipelineError, Result};
use crate::types::{FailedJob, Job, RunReport, TaskReport};
use crate::utils::config::PackagePaths;

/// Combined outcome of planning a command stage and running its jobs.
#[derive(Debug)]
pub struct CommandReport {
    pub plan: TaskReport<Job>,
    pub run: RunReport,
    pub manifest_path: Option<PathBuf>,
}

impl CommandReport {
    pub fn failed(&self) -> usize {
        self.plan.failures.len() + self.run.failed.len()
    }
}

#[derive(Clone, Debug)]
pub struct Stage {
    name: String,
    input: PathBuf,
    output: PathBuf,
    results_dir: Option<PathBuf>,
}

fn validate_name(name: &str) -> Result<()> {
    let bad = matches!(name, "" | "." | "..")
        || name
            .chars()
            .any(|c| std::path::is_separator(c) || c.is_control());
    if bad {
        return Err(PipelineError::config(format!(
            "stage name `{name}` cannot be used in a file name"
        )));
    }
    Ok(())
}

impl Stage {
    /// Check the directory contract without touching the filesystem.
    pub fn check(name: &str, input: &Path, output: &Path, output_exist_ok: bool) -> Result<()> {
        validate_name(name)?;
        if !input.is_dir() {
            return Err(PipelineError::config_at(
                format!("[{name}] source directory not found"),
                input,
            ));
        }
        if !output_exist_ok && output.exists() {
            return Err(PipelineError::config_at(
                format!("[{name}] target directory already exists"),
                output,
            ));
        }
        Ok(())
    }

    /// Enforce the directory contract, then create the output root.
    pub fn new(name: &str, input: &Path, output: &Path, output_exist_ok: bool) -> Result<Self> {
        Self::check(name, input, output, output_exist_ok)?;
        let input = absolute(input)?;
        let output = absolute(output)?;
        std::fs::create_dir_all(&output).map_err(|e| PipelineError::io(&output, e))?;
        info!(
            "[{}] Process from {} to {} created.",
            name,
            input.display(),
            output.display()
        );
        Ok(Self {
            name: name.to_string(),
            input,
            output,
            results_dir: None,
        })
    }

    /// Write failed-jobs manifests under `dir`.
    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = Some(dir.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn manifest_path(&self) -> Option<PathBuf> {
        self.results_dir
            .as_deref()
            .map(|d| PackagePaths::manifest_path(d, &self.name))
    }

    /// Run `work` over every file of the input tree (task runner).
    pub fn run_tasks<W: Work>(
        &self,
        work: &W,
        mapper: &PathMapper,
        opts: &TaskOpts,
    ) -> Result<TaskReport<W::Output>> {
        let opts = TaskOpts {
            allow_existing_destination: true,
            results_dir: opts.results_dir.clone().or_else(|| self.results_dir.clone()),
            ..opts.clone()
        };
        run_tasks(&self.name, &self.input, &self.output, work, mapper, &opts)
    }

    /// Run `template` over explicit `jobs` (process supervisor).
    pub fn run_commands(
        &self,
        template: &str,
        jobs: &[Job],
        opts: &SupervisorOpts,
    ) -> Result<RunReport> {
        let opts = SupervisorOpts {
            results_dir: opts.results_dir.clone().or_else(|| self.results_dir.clone()),
            ..opts.clone()
        };
        run_pool(&self.name, template, jobs, &opts)
    }

    /// Mirror the input tree, plan one `(src, dst)` job per file, then run `template` over them.
    ///
    /// Planning failures and terminal job failures land in one manifest.
    pub fn run_commands_over_tree(
        &self,
        template: &str,
        mapper: &PathMapper,
        task_opts: &TaskOpts,
        opts: &SupervisorOpts,
    ) -> Result<CommandReport> {
        let task_opts = TaskOpts {
            allow_existing_destination: true,
            results: ResultMode::Collect,
            results_dir: None,
            ..task_opts.clone()
        };
        let plan = run_tasks(
            &self.name,
            &self.input,
            &self.output,
            &PlanJob,
            mapper,
            &task_opts,
        )?;
        let jobs: Vec<Job> = plan
            .results
            .iter()
            .filter_map(|r| r.as_ref().ok().cloned())
            .collect();

        let run_opts = SupervisorOpts {
            results_dir: None,
            ..opts.clone()
        };
        let run = run_pool(&self.name, template, &jobs, &run_opts)?;

        let results_dir = opts.results_dir.clone().or_else(|| self.results_dir.clone());
        let manifest_path = match results_dir {
            Some(dir) => {
                let mut failed: Vec<FailedJob> =
                    plan.failures.iter().map(FailedJob::from).collect();
                failed.extend(run.failed.iter().cloned());
                Some(write_manifest(&dir, &self.name, &failed)?)
            }
            None => None,
        };
        Ok(CommandReport {
            plan,
            run,
            manifest_path,
        })
    }
}
