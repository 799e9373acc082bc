//! Engine module: process supervision, templates, telemetry and the CLI glue.

pub mod arg_parser;
pub mod cli;
pub mod manifest;
pub mod progress;
pub mod spawn;
pub mod supervisor;
pub mod template;
pub mod tools;

// Re-export commonly used functions
pub use arg_parser::{Cli, Commands};
pub use cli::handle_run;
pub use manifest::{read_manifest, write_manifest};
pub use supervisor::{AdmissionPolicy, SupervisorOpts, WaitStrategy, run_pool};
pub use template::CommandTemplate;
pub use tools::{PathMapper, path_relative_to, verify_executable};
