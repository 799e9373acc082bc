//! Pipeline components: mirror planning, per-file work, the task runner, stages and the driver.

pub mod orchestrator;
pub mod stage;
pub mod task_runner;
pub mod walk;
pub mod work;

pub use orchestrator::{StageSummary, check_pipeline, run_pipeline};
pub use stage::{CommandReport, Stage};
pub use task_runner::{Isolation, ResultMode, TaskOpts, WorkerCommand, run_tasks};
pub use walk::{EmptyDirPolicy, MirrorPlan, Unit, WalkOpts, plan_mirror};
pub use work::{CopyFile, FnWork, PlanJob, Work, run_named, work_fn};
