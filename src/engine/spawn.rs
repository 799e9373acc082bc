//! Launching one attempt of a job and collecting its exit status and output.

use std::io::Read;
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use super::template::shell_command;
use crate::error::PipelineError;
use crate::types::{JobId, JobOutput};

/// Which streams of the child are piped back to the supervisor.
#[derive(Clone, Copy, Debug, Default)]
pub struct Capture {
    pub stdout: bool,
    pub stderr: bool,
}

/// A spawned child plus the threads draining its pipes.
///
/// Pipes are drained concurrently so a chatty child never blocks on a full pipe while the
/// supervisor is only checking for its exit.
pub struct RunningAttempt {
    pub job: JobId,
    pub command: String,
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

/// Result of one finished attempt.
#[derive(Debug)]
pub struct AttemptOutcome {
    pub job: JobId,
    pub command: String,
    pub status: std::io::Result<ExitStatus>,
    pub output: JobOutput,
}

impl AttemptOutcome {
    pub fn success(&self) -> bool {
        matches!(&self.status, Ok(s) if s.success())
    }

    pub fn code(&self) -> Option<i32> {
        self.status.as_ref().ok().and_then(|s| s.code())
    }

    /// Error describing a failed attempt; `None` when it succeeded.
    pub fn failure(&self) -> Option<PipelineError> {
        match &self.status {
            Ok(s) if s.success() => None,
            Ok(s) => Some(PipelineError::ExternalFailure {
                command: self.command.clone(),
                code: s.code(),
            }),
            Err(e) => Some(PipelineError::Spawn {
                command: self.command.clone(),
                source: std::io::Error::new(e.kind(), e.to_string()),
            }),
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn stdio_for(capture: bool) -> Stdio {
    if capture { Stdio::piped() } else { Stdio::null() }
}

/// Start `command` through the platform shell. Failure to start is a [`PipelineError::Spawn`].
pub fn spawn_attempt(
    job: JobId,
    command: String,
    capture: Capture,
) -> Result<RunningAttempt, PipelineError> {
    let mut child = match shell_command(&command)
        .stdin(Stdio::null())
        .stdout(stdio_for(capture.stdout))
        .stderr(stdio_for(capture.stderr))
        .spawn()
    {
        Ok(child) => child,
        Err(source) => return Err(PipelineError::Spawn { command, source }),
    };
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);
    Ok(RunningAttempt {
        job,
        command,
        child,
        stdout,
        stderr,
    })
}

impl RunningAttempt {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Non-blocking exit check. `Some` once the child has exited (or can no longer be queried).
    pub fn poll(&mut self) -> Option<std::io::Result<ExitStatus>> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(Ok(status)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }

    /// True once both pipe readers have hit end of file. A background grandchild that inherited a
    /// pipe keeps it open after the child itself has exited.
    pub fn pipes_drained(&self) -> bool {
        let done = |h: &Option<JoinHandle<Vec<u8>>>| h.as_ref().is_none_or(|h| h.is_finished());
        done(&self.stdout) && done(&self.stderr)
    }

    /// Block until the child exits, then collect its output.
    pub fn wait(mut self) -> AttemptOutcome {
        let status = self.child.wait();
        self.into_outcome(status)
    }

    /// Join the pipe readers and package the outcome. Call after the child has exited.
    pub fn into_outcome(self, status: std::io::Result<ExitStatus>) -> AttemptOutcome {
        let join =
            |h: Option<JoinHandle<Vec<u8>>>| h.and_then(|h| h.join().ok()).unwrap_or_default();
        AttemptOutcome {
            job: self.job,
            command: self.command,
            status,
            output: JobOutput {
                stdout: join(self.stdout),
                stderr: join(self.stderr),
            },
        }
    }
}
