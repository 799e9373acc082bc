//! Public types for jobs, per-job attempt state and run reports.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stable identity of a job: its position in the submission queue.
pub type JobId = usize;

/// One unit of external-process work.
///
/// `payload` is the tuple the command template is instantiated against. For jobs planned from a
/// directory walk it is `[input, output]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    pub payload: Vec<String>,
}

impl Job {
    /// Job whose payload is the `(input, output)` pair itself.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        let input = input.into();
        let output = output.into();
        let payload = vec![
            input.to_string_lossy().into_owned(),
            output.to_string_lossy().into_owned(),
        ];
        Self {
            input,
            output,
            payload,
        }
    }

    /// Job with an explicit payload tuple.
    pub fn with_payload(
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        payload: Vec<String>,
    ) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            payload,
        }
    }
}

/// Lifecycle of one job inside the supervisor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    /// Failed attempt with budget left; waiting for a slot.
    Retrying,
    Succeeded,
    FailedTerminal,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedTerminal)
    }
}

/// Bytes captured from one finished attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct JobOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Per-job mutable record, owned by the supervisor and indexed by [`JobId`].
#[derive(Clone, Debug)]
pub struct JobRecord {
    pub id: JobId,
    /// Retries consumed so far (0 for a job that succeeded first time).
    pub attempt_count: u32,
    pub status: JobStatus,
    pub output: JobOutput,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            attempt_count: 0,
            status: JobStatus::Queued,
            output: JobOutput::default(),
            last_error: None,
        }
    }

    /// Total number of times the command was launched (or attempted) for this job.
    pub fn invocations(&self) -> u32 {
        match self.status {
            JobStatus::Queued => 0,
            _ => self.attempt_count + 1,
        }
    }
}

/// One entry of the failed-jobs manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJob {
    pub index: JobId,
    pub input: PathBuf,
    pub output: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<String>,
    pub attempts: u32,
    pub reason: String,
}

/// Aggregate result of one supervisor run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub stage: String,
    pub submitted: usize,
    pub succeeded: usize,
    /// Jobs that exhausted their retry budget, in the order they failed.
    pub failed: Vec<FailedJob>,
    /// Highest number of simultaneously running processes observed.
    pub peak_running: usize,
    /// Final per-job records, indexed by [`JobId`].
    pub records: Vec<JobRecord>,
    /// Where the manifest was written, if it was.
    pub manifest_path: Option<PathBuf>,
}

impl RunReport {
    /// Captured output for a job, when capture was requested and the job finished.
    pub fn output(&self, id: JobId) -> Option<&JobOutput> {
        self.records
            .get(id)
            .map(|r| &r.output)
            .filter(|o| !o.stdout.is_empty() || !o.stderr.is_empty())
    }
}

/// A work unit that returned an error (Task Runner).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    /// Submission index of the unit.
    pub index: usize,
    pub src: PathBuf,
    pub dst: PathBuf,
    pub reason: String,
}

impl UnitFailure {
    pub fn new(index: usize, src: &Path, dst: &Path, reason: impl Into<String>) -> Self {
        Self {
            index,
            src: src.to_path_buf(),
            dst: dst.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Aggregate result of one Task Runner pass.
#[derive(Debug)]
pub struct TaskReport<T> {
    pub stage: String,
    /// Units dispatched (one per file).
    pub dispatched: usize,
    /// Directories created under the destination root.
    pub dirs_created: usize,
    /// Per-unit outcomes in submission order; empty in fire-and-forget mode.
    pub results: Vec<std::result::Result<T, UnitFailure>>,
    /// Failed units, then source entries the walk could not read.
    pub failures: Vec<UnitFailure>,
    pub manifest_path: Option<PathBuf>,
}

impl From<&UnitFailure> for FailedJob {
    fn from(u: &UnitFailure) -> Self {
        FailedJob {
            index: u.index,
            input: u.src.clone(),
            output: u.dst.clone(),
            payload: Vec::new(),
            attempts: 1,
            reason: u.reason.clone(),
        }
    }
}

impl<T> TaskReport<T> {
    /// Planned units that finished without error. Unreadable source entries are failures
    /// numbered past `dispatched` and do not count against it.
    pub fn succeeded(&self) -> usize {
        let failed_units = self
            .failures
            .iter()
            .filter(|f| f.index < self.dispatched)
            .count();
        self.dispatched - failed_units
    }

    /// Successful outputs in submission order, dropping failed units.
    pub fn into_outputs(self) -> Vec<T> {
        self.results.into_iter().filter_map(|r| r.ok()).collect()
    }
}
