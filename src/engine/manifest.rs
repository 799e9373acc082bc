//! Failed-jobs manifest: the durable record of everything a stage could not process.

use log::{info, warn};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::types::FailedJob;
use crate::utils::config::PackagePaths;

/// Write `failed` as a JSON array to `<results_dir>/failed_jobs_<stage>.json`.
///
/// Always writes, so an empty array marks a stage that finished cleanly.
pub fn write_manifest(results_dir: &Path, stage: &str, failed: &[FailedJob]) -> Result<PathBuf> {
    std::fs::create_dir_all(results_dir).map_err(|e| PipelineError::io(results_dir, e))?;
    let path = PackagePaths::manifest_path(results_dir, stage);
    let json = serde_json::to_string_pretty(failed)?;
    std::fs::write(&path, json).map_err(|e| PipelineError::io(&path, e))?;

    if failed.is_empty() {
        info!("[{}] No failed jobs. Manifest: {}", stage, path.display());
    } else {
        warn!(
            "[{}] {} failed job(s) listed in {}",
            stage,
            failed.len(),
            path.display()
        );
    }
    Ok(path)
}

/// Read a manifest back (e.g. to re-run only the failed jobs).
pub fn read_manifest(path: &Path) -> Result<Vec<FailedJob>> {
    let s = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(serde_json::from_str(&s)?)
}
