//! Task runner: mirror a source tree and apply a [`Work`] to every file on a bounded pool.
//!
//! Units are independent. A failing unit is logged with its input path and recorded in the
//! report; it never aborts its siblings and is not retried.

use log::{debug, info, warn};
use rayon::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use super::walk::{EmptyDirPolicy, MirrorPlan, Unit, WalkOpts, materialize_dirs, plan_mirror};
use super::work::Work;
use crate::engine::manifest::write_manifest;
use crate::engine::progress::UnitTicker;
use crate::engine::tools::{PathMapper, path_relative_to};
use crate::error::{PipelineError, Result};
use crate::types::{FailedJob, TaskReport, UnitFailure};
use crate::utils::config::{PackagePaths, ProgressConsts, WorkerLimits};

/// Program a worker process is started with: `<program> <args..> <work name> <src> <dst>`.
///
/// The worker prints the unit's JSON-encoded output on stdout and exits 0, or exits non-zero with
/// a reason on stderr.
#[derive(Clone, Debug)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Re-invoke the running binary through its hidden worker subcommand.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|e| PipelineError::io(PackagePaths::get().pkg_name(), e))?;
        Ok(Self {
            program,
            args: vec![PackagePaths::WORKER_SUBCOMMAND.to_string()],
        })
    }
}

/// Where each unit runs.
#[derive(Clone, Debug, Default)]
pub enum Isolation {
    /// In-process on a rayon pool.
    #[default]
    Threads,
    /// One fresh child process per unit, for work that leaks or hangs when repeated in-process.
    Processes(WorkerCommand),
}

/// Whether per-unit outputs are returned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResultMode {
    /// Return every outcome in submission order.
    #[default]
    Collect,
    /// Fire and forget: only failures are kept.
    Discard,
}

/// Options for [`run_tasks`].
#[derive(Clone, Debug)]
pub struct TaskOpts {
    /// Concurrent units. When None, the logical core count.
    pub workers: Option<usize>,
    /// Accept a destination root that already exists. [`Stage`](super::Stage) sets this, since it
    /// has already enforced the directory contract and created the root.
    pub allow_existing_destination: bool,
    pub folder_exist_ok: bool,
    pub file_exist_ok: bool,
    pub empty_dirs: EmptyDirPolicy,
    pub follow_links: bool,
    pub isolation: Isolation,
    pub results: ResultMode,
    pub status_interval: Duration,
    /// Draw a kdam bar instead of periodic log lines.
    pub progress_bar: bool,
    /// Directory for `failed_jobs_<stage>.json`. When None, no manifest is written.
    pub results_dir: Option<PathBuf>,
}

impl TaskOpts {
    /// Options with the given empty-folder policy and defaults elsewhere.
    pub fn new(empty_dirs: EmptyDirPolicy) -> Self {
        Self {
            workers: None,
            allow_existing_destination: false,
            folder_exist_ok: false,
            file_exist_ok: false,
            empty_dirs,
            follow_links: false,
            isolation: Isolation::Threads,
            results: ResultMode::Collect,
            status_interval: ProgressConsts::STATUS_INTERVAL,
            progress_bar: false,
            results_dir: None,
        }
    }

    fn walk_opts(&self) -> WalkOpts {
        WalkOpts {
            folder_exist_ok: self.folder_exist_ok,
            file_exist_ok: self.file_exist_ok,
            empty_dirs: self.empty_dirs,
            follow_links: self.follow_links,
        }
    }
}

fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "work function panicked".to_string())
}

fn apply_in_thread<W: Work>(work: &W, unit: &Unit) -> std::result::Result<W::Output, String> {
    match catch_unwind(AssertUnwindSafe(|| work.apply(&unit.src, &unit.dst))) {
        Ok(Ok(out)) => Ok(out),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(panic_reason(panic)),
    }
}

fn apply_in_process<W: Work>(
    cmd: &WorkerCommand,
    work: &W,
    unit: &Unit,
) -> std::result::Result<W::Output, String> {
    let output = Command::new(&cmd.program)
        .args(&cmd.args)
        .arg(work.name())
        .arg(&unit.src)
        .arg(&unit.dst)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("failed to spawn worker {}: {e}", cmd.program.display()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "worker exited with {}: {}",
            output.status,
            stderr.trim()
        ));
    }
    serde_json::from_slice(&output.stdout).map_err(|e| format!("bad worker output: {e}"))
}

struct UnitRun<'a, W: Work> {
    stage: &'a str,
    work: &'a W,
    isolation: &'a Isolation,
    ticker: &'a UnitTicker,
}

impl<W: Work> UnitRun<'_, W> {
    fn run(&self, index: usize, unit: &Unit) -> std::result::Result<W::Output, UnitFailure> {
        let result = match self.isolation {
            Isolation::Threads => apply_in_thread(self.work, unit),
            Isolation::Processes(cmd) => apply_in_process(cmd, self.work, unit),
        };
        self.ticker.tick();
        result.map_err(|reason| {
            let failure = UnitFailure::new(index, &unit.src, &unit.dst, reason.as_str());
            let err = PipelineError::WorkItem {
                src: unit.src.clone(),
                reason,
            };
            warn!("[{}] {}", self.stage, err);
            failure
        })
    }
}

/// Failures for source entries the walk could not read, numbered after the planned units.
fn unreadable_units(plan: &MirrorPlan, src_root: &Path, dst_root: &Path) -> Vec<UnitFailure> {
    plan.skipped
        .iter()
        .enumerate()
        .map(|(k, (src, reason))| {
            let rel = path_relative_to(src, src_root).unwrap_or_default();
            let reason = format!("unreadable source entry: {reason}");
            UnitFailure::new(plan.units.len() + k, src, &dst_root.join(rel), reason)
        })
        .collect()
}

/// Mirror `src_root` into `dst_root` and apply `work` to every file.
///
/// `dst_root` must not exist unless [`TaskOpts::allow_existing_destination`] is set. The full plan
/// is validated before any directory is created; configuration problems abort, unit failures do
/// not. Source entries the walk could not read are reported as failed units.
pub fn run_tasks<W: Work>(
    stage: &str,
    src_root: &Path,
    dst_root: &Path,
    work: &W,
    mapper: &PathMapper,
    opts: &TaskOpts,
) -> Result<TaskReport<W::Output>> {
    let workers = WorkerLimits::resolve(opts.workers);
    if workers == 0 {
        return Err(PipelineError::config("worker count must be at least 1"));
    }
    if !opts.allow_existing_destination && dst_root.exists() {
        return Err(PipelineError::config_at(
            format!("[{stage}] target directory already exists"),
            dst_root,
        ));
    }
    let plan: MirrorPlan = plan_mirror(src_root, dst_root, mapper, &opts.walk_opts())?;
    std::fs::create_dir_all(dst_root).map_err(|e| PipelineError::io(dst_root, e))?;
    let dirs_created = materialize_dirs(&plan)?;
    info!(
        "[{}] Process from {} to {} running {} on {} {}.",
        stage,
        src_root.display(),
        dst_root.display(),
        work.name(),
        workers,
        match opts.isolation {
            Isolation::Threads => "threads",
            Isolation::Processes(_) => "worker processes",
        }
    );
    debug!(
        "[{}] {} folder(s) created, {} unit(s) planned",
        stage,
        dirs_created,
        plan.units.len()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| PipelineError::config(format!("cannot build worker pool: {e}")))?;
    let ticker = UnitTicker::new(
        stage,
        plan.units.len(),
        opts.status_interval,
        opts.progress_bar,
    );
    let runner = UnitRun {
        stage,
        work,
        isolation: &opts.isolation,
        ticker: &ticker,
    };

    let (results, mut failures) = match opts.results {
        ResultMode::Collect => {
            let results: Vec<_> = pool.install(|| {
                plan.units
                    .par_iter()
                    .enumerate()
                    .map(|(i, u)| runner.run(i, u))
                    .collect()
            });
            let failures = results
                .iter()
                .filter_map(|r| r.as_ref().err().cloned())
                .collect();
            (results, failures)
        }
        ResultMode::Discard => {
            let failures = Mutex::new(Vec::new());
            pool.install(|| {
                plan.units.par_iter().enumerate().for_each(|(i, u)| {
                    if let Err(f) = runner.run(i, u)
                        && let Ok(mut v) = failures.lock()
                    {
                        v.push(f);
                    }
                })
            });
            let mut failures = failures.into_inner().unwrap_or_default();
            failures.sort_by_key(|f: &UnitFailure| f.index);
            (Vec::new(), failures)
        }
    };
    ticker.finish();
    failures.extend(unreadable_units(&plan, src_root, dst_root));
    info!(
        "[{}] Processing: {}. {} unit(s) failed.",
        stage,
        ticker.done(),
        failures.len()
    );

    let manifest_path = match &opts.results_dir {
        Some(dir) => {
            let entries: Vec<FailedJob> = failures.iter().map(FailedJob::from).collect();
            Some(write_manifest(dir, stage, &entries)?)
        }
        None => None,
    };
    Ok(TaskReport {
        stage: stage.to_string(),
        dispatched: plan.units.len(),
        dirs_created,
        results,
        failures,
        manifest_path,
    })
}
