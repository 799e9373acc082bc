//! Scorepipe CLI: run or pre-flight the stages of a pipeline file.

use anyhow::Result;
use clap::Parser;
use scorepipe::engine::arg_parser::Cli;
use scorepipe::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
