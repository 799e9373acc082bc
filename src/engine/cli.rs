//! CLI command handlers: run a pipeline, pre-flight it, or act as a worker process.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::Path;

use crate::engine::arg_parser::{Cli, Commands};
use crate::pipeline::work::run_named;
use crate::pipeline::{StageSummary, check_pipeline, run_pipeline};
use crate::utils::pipeline_toml::{CliOverrides, PipelineConfig, load_pipeline};
use crate::utils::setup_logging;

fn setup_config(path: &Path, overrides: &CliOverrides) -> Result<PipelineConfig> {
    let mut cfg = load_pipeline(path)?;
    cfg.apply_overrides(overrides);
    setup_logging(cfg.verbose);
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        cfg
    );
    Ok(cfg)
}

fn log_summaries(summaries: &[StageSummary]) {
    for s in summaries {
        let unit = s.unit_label();
        if s.failed > 0 {
            warn!("[{}] {} of {} {unit} failed.", s.name, s.failed, s.dispatched);
        } else {
            info!("[{}] {} {unit} succeeded.", s.name, s.succeeded);
        }
    }
    let failed: usize = summaries.iter().map(|s| s.failed).sum();
    info!(
        "Pipeline finished: {} stage(s), {} failure(s).",
        summaries.len(),
        failed
    );
}

/// Dispatch the parsed command line.
pub fn handle_run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Run {
            file,
            only,
            workers,
            results_dir,
            software_dir,
            verbose,
        } => {
            let overrides = CliOverrides {
                results_dir: results_dir.clone(),
                software_dir: software_dir.clone(),
                workers: *workers,
                verbose: *verbose,
            };
            let cfg = setup_config(&file.path(), &overrides)?;
            let summaries = run_pipeline(&cfg, only)?;
            log_summaries(&summaries);
        }
        Commands::Check { file, verbose } => {
            let overrides = CliOverrides {
                verbose: *verbose,
                ..CliOverrides::default()
            };
            let cfg = setup_config(&file.path(), &overrides)?;
            check_pipeline(&cfg)?;
            info!("{} stage(s) ready to run.", cfg.stages.len());
        }
        Commands::Work { name, src, dst } => {
            let json = run_named(name, src, dst)
                .with_context(|| format!("work `{name}` failed on {}", src.display()))?;
            println!("{json}");
        }
    }
    Ok(())
}
