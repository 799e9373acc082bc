//! Scorepipe: staged batch processing of file corpora.
//!
//! Two engines do the work. The task runner ([`pipeline::run_tasks`]) mirrors a source tree and
//! applies an in-process (or worker-process) transform to every file. The process supervisor
//! ([`engine::run_pool`]) runs an external command per job on a bounded pool, retrying failures
//! and writing a manifest of jobs that never succeeded. [`Stage`] ties an input root to an output
//! root; [`pipeline::run_pipeline`] runs stages loaded from a TOML file.
//!
//! ```ignore
//! let stage = scorepipe::Stage::new("convert", "midi/flat".as_ref(), "midi/abc".as_ref(), false)?
//!     .with_results_dir("results");
//! let jobs = vec![scorepipe::Job::new("midi/flat/a.mid", "midi/abc/a.abc")];
//! let report = stage.run_commands("softwares/midi2abc -f {} -o {}", &jobs, &Default::default())?;
//! ```

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::{PathMapper, SupervisorOpts, run_pool};
pub use error::{PipelineError, Result};
pub use pipeline::{EmptyDirPolicy, Stage, TaskOpts, Work, run_tasks, work_fn};
