//! Per-file work functions for the task runner, and the registry worker processes dispatch through.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

use crate::types::Job;

/// One per-file transform applied by the task runner.
///
/// `name` identifies the work to a worker process when the runner isolates units in child
/// processes; only names known to [`run_named`] can be isolated that way.
pub trait Work: Sync {
    type Output: Send + DeserializeOwned;

    fn name(&self) -> &str;

    fn apply(&self, src: &Path, dst: &Path) -> Result<Self::Output>;
}

/// Closure-backed [`Work`] for in-process use.
pub struct FnWork<F> {
    name: String,
    f: F,
}

/// Wrap a closure as [`Work`].
pub fn work_fn<T, F>(name: impl Into<String>, f: F) -> FnWork<F>
where
    F: Fn(&Path, &Path) -> Result<T> + Sync,
    T: Send + DeserializeOwned,
{
    FnWork {
        name: name.into(),
        f,
    }
}

impl<T, F> Work for FnWork<F>
where
    F: Fn(&Path, &Path) -> Result<T> + Sync,
    T: Send + DeserializeOwned,
{
    type Output = T;

    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, src: &Path, dst: &Path) -> Result<T> {
        (self.f)(src, dst)
    }
}

/// Copy the source file to its destination. Output: bytes copied.
pub struct CopyFile;

impl Work for CopyFile {
    type Output = u64;

    fn name(&self) -> &str {
        "copy"
    }

    fn apply(&self, src: &Path, dst: &Path) -> Result<u64> {
        std::fs::copy(src, dst)
            .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))
    }
}

/// Record the `(src, dst)` pair as a [`Job`] for the process supervisor. Touches nothing.
pub struct PlanJob;

impl Work for PlanJob {
    type Output = Job;

    fn name(&self) -> &str {
        "plan"
    }

    fn apply(&self, src: &Path, dst: &Path) -> Result<Job> {
        Ok(Job::new(src, dst))
    }
}

fn apply_json<W>(work: &W, src: &Path, dst: &Path) -> Result<String>
where
    W: Work,
    W::Output: Serialize,
{
    let out = work.apply(src, dst)?;
    serde_json::to_string(&out).context("encode work output")
}

/// Run a built-in work by name and return its output as JSON. Used by worker processes.
pub fn run_named(name: &str, src: &Path, dst: &Path) -> Result<String> {
    match name {
        "copy" => apply_json(&CopyFile, src, dst),
        "plan" => apply_json(&PlanJob, src, dst),
        other => bail!("unknown work `{other}`"),
    }
}
