//! Process supervisor: runs a job list against a fixed pool of OS processes with bounded retries.
//!
//! Each job moves through
//! `Queued -> Running -> {Succeeded | Retrying -> Running | FailedTerminal}`.
//! At most `pool_size` jobs are Running at once. A slot is freed when its process is reaped and is
//! back-filled in the same tick. The loop never blocks on one child: it either waits on exit events
//! from all slots at once ([`WaitStrategy::Events`]) or polls every child ([`WaitStrategy::Poll`]).

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::thread;
use std::time::Duration;

use super::manifest::write_manifest;
use super::progress::{PoolStatus, StatusReporter};
use super::spawn::{AttemptOutcome, Capture, RunningAttempt, spawn_attempt};
use super::template::CommandTemplate;
use crate::error::{PipelineError, Result};
use crate::types::{FailedJob, Job, JobId, JobOutput, JobRecord, JobStatus, RunReport};
use crate::utils::config::{ProgressConsts, SupervisorConsts, WorkerLimits};

/// Where a job goes after a failed attempt with budget left.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Retry-priority admission: retries take the next free slot ahead of unstarted jobs.
    #[default]
    RetryFirst,
    /// Retries rejoin the tail of the queue.
    Fifo,
}

/// How finished children are detected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WaitStrategy {
    /// One waiter thread per occupied slot reports exits on a channel.
    #[default]
    Events,
    /// Check every child with a non-blocking `try_wait` each tick.
    Poll,
}

/// Options for [`run_pool`].
#[derive(Clone, Debug)]
pub struct SupervisorOpts {
    /// Concurrent processes. When None, the logical core count.
    pub pool_size: Option<usize>,
    /// Retries per job after the first attempt.
    pub max_retry_count: u32,
    /// Sleep between polling rounds with [`WaitStrategy::Poll`]. May be zero (busy polling).
    pub tick: Duration,
    /// Wall time between status lines.
    pub status_interval: Duration,
    /// Keep each job's stdout in the report and log it at debug level.
    pub capture_stdout: bool,
    /// Keep each job's stderr in the report and log it at debug level.
    pub capture_stderr: bool,
    /// Payload slot holding a file path that receives the job's stdout on success.
    pub stdout_to_payload: Option<usize>,
    pub admission: AdmissionPolicy,
    pub wait: WaitStrategy,
    /// Directory for `failed_jobs_<stage>.json`. When None, no manifest is written.
    pub results_dir: Option<PathBuf>,
}

impl Default for SupervisorOpts {
    fn default() -> Self {
        Self {
            pool_size: None,
            max_retry_count: SupervisorConsts::MAX_RETRY_COUNT,
            tick: SupervisorConsts::TICK,
            status_interval: ProgressConsts::STATUS_INTERVAL,
            capture_stdout: false,
            capture_stderr: false,
            stdout_to_payload: None,
            admission: AdmissionPolicy::default(),
            wait: WaitStrategy::default(),
            results_dir: None,
        }
    }
}

impl SupervisorOpts {
    fn capture(&self) -> Capture {
        Capture {
            stdout: self.capture_stdout || self.stdout_to_payload.is_some(),
            stderr: self.capture_stderr,
        }
    }
}

// ---- Reapers: detect finished attempts ----

trait Reaper {
    fn track(&mut self, attempt: RunningAttempt);
    /// Finished attempts; waits at most `timeout` for the first one.
    fn reap(&mut self, timeout: Duration) -> Vec<AttemptOutcome>;
}

/// Event-driven: each attempt is owned by a waiter thread that sends its outcome on exit.
struct EventReaper {
    tx: Sender<AttemptOutcome>,
    rx: Receiver<AttemptOutcome>,
}

impl EventReaper {
    fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl Reaper for EventReaper {
    fn track(&mut self, attempt: RunningAttempt) {
        let tx = self.tx.clone();
        thread::spawn(move || {
            let _ = tx.send(attempt.wait());
        });
    }

    fn reap(&mut self, timeout: Duration) -> Vec<AttemptOutcome> {
        let mut done = Vec::new();
        match self.rx.recv_timeout(timeout) {
            Ok(outcome) => done.push(outcome),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => return done,
        }
        done.extend(self.rx.try_iter());
        done
    }
}

/// Polling fallback: `try_wait` on every child each round, sleep one tick when nothing finished.
///
/// An exited child whose pipes are still open moves to `draining` and is only turned into an
/// outcome once its readers finish, so the loop never joins a reader that may block.
#[derive(Default)]
struct PollReaper {
    tick: Duration,
    running: Vec<RunningAttempt>,
    draining: Vec<(RunningAttempt, std::io::Result<ExitStatus>)>,
}

impl Reaper for PollReaper {
    fn track(&mut self, attempt: RunningAttempt) {
        self.running.push(attempt);
    }

    fn reap(&mut self, _timeout: Duration) -> Vec<AttemptOutcome> {
        let mut i = 0;
        while i < self.running.len() {
            match self.running[i].poll() {
                Some(status) => {
                    let attempt = self.running.swap_remove(i);
                    self.draining.push((attempt, status));
                }
                None => i += 1,
            }
        }
        let mut done = Vec::new();
        let mut i = 0;
        while i < self.draining.len() {
            if self.draining[i].0.pipes_drained() {
                let (attempt, status) = self.draining.swap_remove(i);
                done.push(attempt.into_outcome(status));
            } else {
                i += 1;
            }
        }
        if done.is_empty() {
            if self.tick.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(self.tick);
            }
        }
        done
    }
}

// ---- Supervisor state ----

/// Owns the per-job arena and the aggregate report for one run.
struct PoolState<'a> {
    stage: &'a str,
    jobs: &'a [Job],
    template: &'a CommandTemplate,
    opts: &'a SupervisorOpts,
    records: Vec<JobRecord>,
    queue: VecDeque<JobId>,
    retries: VecDeque<JobId>,
    running: usize,
    dispatched: usize,
    succeeded: usize,
    peak_running: usize,
    failed: Vec<FailedJob>,
}

impl<'a> PoolState<'a> {
    fn new(
        stage: &'a str,
        jobs: &'a [Job],
        template: &'a CommandTemplate,
        opts: &'a SupervisorOpts,
    ) -> Self {
        Self {
            stage,
            jobs,
            template,
            opts,
            records: (0..jobs.len()).map(JobRecord::new).collect(),
            queue: (0..jobs.len()).collect(),
            retries: VecDeque::new(),
            running: 0,
            dispatched: 0,
            succeeded: 0,
            peak_running: 0,
            failed: Vec::new(),
        }
    }

    fn next_job(&mut self) -> Option<JobId> {
        self.retries.pop_front().or_else(|| self.queue.pop_front())
    }

    fn is_finished(&self) -> bool {
        self.running == 0 && self.queue.is_empty() && self.retries.is_empty()
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            dispatched: self.dispatched,
            total: self.jobs.len(),
            completed: self.succeeded + self.failed.len(),
            running: self.running,
            failed: self.failed.len(),
        }
    }

    /// Fill free slots. Spawn failures are charged to the job and the slot stays free.
    fn admit(&mut self, pool_size: usize, reaper: &mut dyn Reaper) -> Result<()> {
        while self.running < pool_size {
            let Some(id) = self.next_job() else {
                break;
            };
            if self.records[id].status == JobStatus::Queued {
                self.dispatched += 1;
            }
            let command = self.template.render(&self.jobs[id].payload)?;
            match spawn_attempt(id, command, self.opts.capture()) {
                Ok(attempt) => {
                    let record = &mut self.records[id];
                    record.status = JobStatus::Running;
                    debug!(
                        "[{}] job {} started (pid {}, attempt {})",
                        self.stage,
                        id,
                        attempt.pid(),
                        record.attempt_count + 1
                    );
                    self.running += 1;
                    self.peak_running = self.peak_running.max(self.running);
                    reaper.track(attempt);
                }
                Err(err) => {
                    self.records[id].status = JobStatus::Running;
                    self.on_failure(id, &err);
                }
            }
        }
        Ok(())
    }

    fn on_outcome(&mut self, mut outcome: AttemptOutcome) {
        let id = outcome.job;
        self.running -= 1;
        self.log_outcome(&outcome);

        if let Some(err) = outcome.failure() {
            self.records[id].output = retained_output(self.opts, &mut outcome);
            self.on_failure(id, &err);
            return;
        }
        if let Some(slot) = self.opts.stdout_to_payload {
            let path = PathBuf::from(&self.jobs[id].payload[slot]);
            if let Err(e) = std::fs::write(&path, &outcome.output.stdout) {
                let err = PipelineError::io(&path, e);
                self.on_failure(id, &err);
                return;
            }
        }
        let output = retained_output(self.opts, &mut outcome);
        let record = &mut self.records[id];
        record.output = output;
        record.status = JobStatus::Succeeded;
        record.last_error = None;
        self.succeeded += 1;
    }

    fn on_failure(&mut self, id: JobId, err: &PipelineError) {
        let max = self.opts.max_retry_count;
        let record = &mut self.records[id];
        record.last_error = Some(err.to_string());
        if record.attempt_count < max {
            record.attempt_count += 1;
            record.status = JobStatus::Retrying;
            warn!(
                "[{}] job {} failed ({}); retry {}/{}",
                self.stage, id, err, record.attempt_count, max
            );
            match self.opts.admission {
                AdmissionPolicy::RetryFirst => self.retries.push_back(id),
                AdmissionPolicy::Fifo => self.queue.push_back(id),
            }
            return;
        }
        record.status = JobStatus::FailedTerminal;
        let job = &self.jobs[id];
        error!(
            "[{}] job {} failed after {} attempt(s): {}",
            self.stage,
            id,
            record.invocations(),
            err
        );
        self.failed.push(FailedJob {
            index: id,
            input: job.input.clone(),
            output: job.output.clone(),
            payload: job.payload.clone(),
            attempts: record.invocations(),
            reason: err.to_string(),
        });
    }

    fn log_outcome(&self, outcome: &AttemptOutcome) {
        if !log::log_enabled!(log::Level::Debug) {
            return;
        }
        let record = &self.records[outcome.job];
        let mut msg = format!(
            "[{}] Outcome for job {}:\n\t- Command: {}\n\t- Number of fails: {}",
            self.stage, outcome.job, outcome.command, record.attempt_count
        );
        if self.opts.capture_stdout {
            msg.push_str(&format!(
                "\n\t- stdout:\n{}",
                String::from_utf8_lossy(&outcome.output.stdout)
            ));
        }
        if self.opts.capture_stderr {
            msg.push_str(&format!(
                "\n\t- stderr:\n{}",
                String::from_utf8_lossy(&outcome.output.stderr)
            ));
        }
        match outcome.code() {
            Some(0) => msg.push_str("\n\t- Successful!"),
            Some(code) => msg.push_str(&format!("\n\t- Error code: {code}")),
            None => msg.push_str("\n\t- No exit code"),
        }
        debug!("{msg}");
    }

    fn into_report(self, manifest_path: Option<PathBuf>) -> RunReport {
        debug_assert!(self.records.iter().all(|r| r.status.is_terminal()));
        RunReport {
            stage: self.stage.to_string(),
            submitted: self.jobs.len(),
            succeeded: self.succeeded,
            failed: self.failed,
            peak_running: self.peak_running,
            records: self.records,
            manifest_path,
        }
    }
}

/// Output retained in the report: only the streams the caller asked to capture.
fn retained_output(opts: &SupervisorOpts, outcome: &mut AttemptOutcome) -> JobOutput {
    let mut out = std::mem::take(&mut outcome.output);
    if !opts.capture_stdout {
        out.stdout.clear();
    }
    if !opts.capture_stderr {
        out.stderr.clear();
    }
    out
}

/// Reject contradictory options and payloads that cannot fill the template, before any spawn.
fn validate(template: &CommandTemplate, jobs: &[Job], opts: &SupervisorOpts) -> Result<usize> {
    let pool_size = WorkerLimits::resolve(opts.pool_size);
    if pool_size == 0 {
        return Err(PipelineError::config("pool size must be at least 1"));
    }
    let arity = template.arity();
    for job in jobs {
        if job.payload.len() < arity {
            return Err(PipelineError::config_at(
                format!(
                    "command template `{}` needs {} payload item(s), job has {}",
                    template.as_str(),
                    arity,
                    job.payload.len()
                ),
                &job.input,
            ));
        }
        if let Some(slot) = opts.stdout_to_payload
            && slot >= job.payload.len()
        {
            return Err(PipelineError::config_at(
                format!("stdout file slot {slot} is outside the job payload"),
                &job.input,
            ));
        }
    }
    Ok(pool_size)
}

/// Run every job in `jobs` through `template` on a bounded process pool.
///
/// Returns once every job is Succeeded or FailedTerminal. Job failures never abort the run; only
/// configuration problems (detected before the first spawn) and a failure to write the manifest
/// are returned as errors.
pub fn run_pool(
    stage: &str,
    template: &str,
    jobs: &[Job],
    opts: &SupervisorOpts,
) -> Result<RunReport> {
    let template = CommandTemplate::parse(template)?;
    let pool_size = validate(&template, jobs, opts)?;
    info!(
        "[{}] Running `{}` over {} job(s) with {} instance(s).",
        stage,
        template.as_str(),
        jobs.len(),
        pool_size
    );

    let mut reaper: Box<dyn Reaper> = match opts.wait {
        WaitStrategy::Events => Box::new(EventReaper::new()),
        WaitStrategy::Poll => Box::new(PollReaper {
            tick: opts.tick,
            ..PollReaper::default()
        }),
    };
    let mut state = PoolState::new(stage, jobs, &template, opts);
    let mut reporter = StatusReporter::new(stage, opts.status_interval);

    loop {
        state.admit(pool_size, reaper.as_mut())?;
        if state.is_finished() {
            break;
        }
        if state.running > 0 {
            // Event mode wakes on the first exit; the timeout only keeps status lines on time.
            let timeout = reporter.until_next().max(Duration::from_millis(1));
            for outcome in reaper.reap(timeout) {
                state.on_outcome(outcome);
            }
        }
        reporter.maybe_report(&state.status());
    }
    reporter.report(&state.status());

    info!(
        "[{}] Done: {} succeeded, {} failed.",
        stage,
        state.succeeded,
        state.failed.len()
    );
    let manifest_path = match &opts.results_dir {
        Some(dir) => Some(write_manifest(dir, stage, &state.failed)?),
        None => None,
    };
    Ok(state.into_report(manifest_path))
}
