use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::config::PackagePaths;

/// Staged batch processing of file corpora.
#[derive(Clone, Parser)]
#[command(name = "scorepipe")]
#[command(about = "Run the stages of a pipeline file over a corpus.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Run every stage (or the ones named with --only) in file order.
    Run {
        #[command(flatten)]
        file: PipelineArg,

        /// Run only these stages. Can specify multiple: --only flatten convert
        #[arg(long, num_args = 1..)]
        only: Vec<String>,

        /// Concurrent units or processes per stage, unless a stage sets its own.
        #[arg(long, short = 'w', value_parser = clap::value_parser!(usize))]
        workers: Option<usize>,

        /// Directory receiving failed_jobs_<stage>.json manifests.
        #[arg(long, short = 'r')]
        results_dir: Option<PathBuf>,

        /// Directory external executables are resolved against.
        #[arg(long, short = 's')]
        software_dir: Option<PathBuf>,

        /// Verbose output.
        #[arg(
            long,
            short = 'v',
            num_args = 0..=1,
            default_missing_value = "true",
            value_parser = clap::value_parser!(bool)
        )]
        verbose: Option<bool>,
    },
    /// Pre-flight only: input roots, output roots and executables. Creates nothing.
    Check {
        #[command(flatten)]
        file: PipelineArg,

        /// Verbose output.
        #[arg(
            long,
            short = 'v',
            num_args = 0..=1,
            default_missing_value = "true",
            value_parser = clap::value_parser!(bool)
        )]
        verbose: Option<bool>,
    },
    /// Apply one built-in work function to one file and print its JSON output.
    #[command(hide = true)]
    Work {
        name: String,
        src: PathBuf,
        dst: PathBuf,
    },
}

#[derive(Clone, clap::Args)]
pub struct PipelineArg {
    /// Pipeline file. Default: `scorepipe.toml` in the current directory.
    #[arg(value_name = "PIPELINE")]
    pub pipeline: Option<PathBuf>,
}

impl PipelineArg {
    pub fn path(&self) -> PathBuf {
        self.pipeline
            .clone()
            .unwrap_or_else(|| PathBuf::from(PackagePaths::get().pipeline_filename()))
    }
}
