//! Application configuration constants.
//! Defaults and naming rules in one place.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    pipeline_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Directory (relative to the working directory) receiving failed-jobs manifests.
    pub const RESULTS_DIR: &'static str = "results";
    /// Directory external executables are resolved against.
    pub const SOFTWARE_DIR: &'static str = "softwares";
    /// Hidden subcommand a worker process is started with.
    pub const WORKER_SUBCOMMAND: &'static str = "work";

    /// Build and cache names from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                pipeline_filename: format!("{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Default pipeline file looked up in the working directory.
    pub fn pipeline_filename(&self) -> &str {
        &self.pipeline_filename
    }

    /// Manifest file name for a stage: `failed_jobs_<stage>.json`.
    pub fn manifest_filename(stage: &str) -> String {
        format!("failed_jobs_{stage}.json")
    }

    pub fn manifest_path(results_dir: &Path, stage: &str) -> PathBuf {
        results_dir.join(Self::manifest_filename(stage))
    }
}

// ---- Worker pool ----

/// Pool sizing for both engines.
#[derive(Clone, Copy, Debug)]
pub struct WorkerLimits {
    /// Logical cores reported by rayon; set by [`WorkerLimits::current()`].
    pub all_threads: usize,
}

impl WorkerLimits {
    pub const FLOOR_THREADS: usize = 1;

    /// Limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads().max(Self::FLOOR_THREADS),
        }
    }

    /// `requested` when given, otherwise the logical core count.
    pub fn resolve(requested: Option<usize>) -> usize {
        requested.unwrap_or_else(|| Self::current().all_threads)
    }
}

// ---- Supervisor ----

/// Defaults for the process supervisor.
pub struct SupervisorConsts;

impl SupervisorConsts {
    /// Retries per job before it becomes terminal.
    pub const MAX_RETRY_COUNT: u32 = 10;
    /// Scheduler tick between polling rounds.
    pub const TICK: Duration = Duration::from_millis(100);
}

// ---- Progress ----

/// Progress reporting cadence.
pub struct ProgressConsts;

impl ProgressConsts {
    /// Wall time between status lines / progress refreshes.
    pub const STATUS_INTERVAL: Duration = Duration::from_secs(1);
}
