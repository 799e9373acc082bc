//! Error taxonomy for stages, the task runner and the process supervisor.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for the library API.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors raised by the pipeline engine.
///
/// Only [`PipelineError::Configuration`] aborts a run. The per-job and per-unit variants are
/// recorded against the job that produced them and never escalate to siblings.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Pre-flight failure: missing root, clobbered output, contradictory options.
    #[error("configuration error: {msg}{}", path_suffix(.path))]
    Configuration { msg: String, path: Option<PathBuf> },

    /// The OS could not start the external process.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The external process ran and exited unsuccessfully.
    #[error("`{command}` exited with {}", exit_code_label(.code))]
    ExternalFailure { command: String, code: Option<i32> },

    /// An in-process work function failed on one file.
    #[error("work unit failed for {}: {reason}", .src.display())]
    WorkItem { src: PathBuf, reason: String },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration {
            msg: msg.into(),
            path: None,
        }
    }

    pub fn config_at(msg: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Configuration {
            msg: msg.into(),
            path: Some(path.into()),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (killed by signal)".to_string(),
    }
}
