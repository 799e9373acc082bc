pub mod config;
pub mod logger;
pub mod pipeline_toml;

pub use config::*;
pub use logger::setup_logging;
pub use pipeline_toml::{CliOverrides, PipelineConfig, StageSpec, load_pipeline};
