//! Mirror planning: walk a source tree and decide every destination directory and file up front.
//!
//! Nothing here touches the destination. The plan is validated in full (collisions, empty
//! directories) so a misconfigured stage fails before any directory is created or unit dispatched.

use log::{debug, warn};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::engine::tools::{PathMapper, path_relative_to};
use crate::error::{PipelineError, Result};

/// What to do with a source directory that holds no files directly.
///
/// There is no default: every caller picks one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyDirPolicy {
    /// Leave it out of the destination (it still appears if a descendant needs it).
    Skip,
    /// Create it in the destination anyway.
    Mirror,
    /// Treat it as a fatal misconfiguration.
    Reject,
}

/// Collision rules for the destination tree.
#[derive(Clone, Copy, Debug)]
pub struct WalkOpts {
    pub folder_exist_ok: bool,
    pub file_exist_ok: bool,
    pub empty_dirs: EmptyDirPolicy,
    pub follow_links: bool,
}

/// One file to process: absolute source and destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Unit {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// Directories to create (parents first) and units in submission order.
#[derive(Debug, Default)]
pub struct MirrorPlan {
    pub dirs: Vec<PathBuf>,
    pub units: Vec<Unit>,
    /// Source paths the walk could not read.
    pub skipped: Vec<(PathBuf, String)>,
}

struct Walked {
    path: PathBuf,
    is_dir: bool,
}

fn walk_sorted(src_root: &Path, follow_links: bool) -> (Vec<Walked>, Vec<(PathBuf, String)>) {
    let mut entries = Vec::new();
    let mut skipped = Vec::new();
    for r in WalkDir::new(src_root)
        .follow_links(follow_links)
        .sort_by_file_name()
        .into_iter()
    {
        match r {
            Ok(entry) => {
                let is_dir = entry.file_type().is_dir();
                entries.push(Walked {
                    path: entry.into_path(),
                    is_dir,
                });
            }
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| src_root.to_path_buf());
                skipped.push((path, err.to_string()));
            }
        }
    }
    (entries, skipped)
}

/// Plan the mirror of `src_root` into `dst_root`.
///
/// The source root maps onto `dst_root` itself; every other directory maps to its parent's
/// destination joined with `mapper`'s name for it, and every file likewise.
pub fn plan_mirror(
    src_root: &Path,
    dst_root: &Path,
    mapper: &PathMapper,
    opts: &WalkOpts,
) -> Result<MirrorPlan> {
    if !src_root.is_dir() {
        return Err(PipelineError::config_at(
            "source directory not found",
            src_root,
        ));
    }
    let (entries, skipped) = walk_sorted(src_root, opts.follow_links);
    for (path, msg) in &skipped {
        warn!("Skipping unreadable path {}: {}", path.display(), msg);
    }

    let has_files: HashSet<&Path> = entries
        .iter()
        .filter(|e| !e.is_dir)
        .filter_map(|e| e.path.parent())
        .collect();

    let mut dst_of: HashMap<&Path, PathBuf> = HashMap::new();
    dst_of.insert(src_root, dst_root.to_path_buf());
    let mut plan = MirrorPlan {
        skipped,
        ..MirrorPlan::default()
    };
    let mut seen_dirs: HashSet<PathBuf> = HashSet::new();
    let mut seen_files: HashSet<PathBuf> = HashSet::new();

    for e in &entries {
        if e.path == src_root {
            continue;
        }
        let Some(parent_dst) = e.path.parent().and_then(|p| dst_of.get(p)) else {
            continue;
        };
        let dst = parent_dst.join(mapper.map(&e.path, e.is_dir));

        if e.is_dir {
            let empty = !has_files.contains(e.path.as_path());
            match (empty, opts.empty_dirs) {
                (true, EmptyDirPolicy::Reject) => {
                    return Err(PipelineError::config_at("empty source folder", &e.path));
                }
                (true, EmptyDirPolicy::Skip) => {
                    let rel = path_relative_to(&e.path, src_root).unwrap_or_default();
                    debug!("Empty folder skipped: {}", rel.display());
                }
                _ => {
                    if !opts.folder_exist_ok && (dst.exists() || !seen_dirs.insert(dst.clone())) {
                        return Err(PipelineError::config_at("folder path already exists", dst));
                    }
                    plan.dirs.push(dst.clone());
                }
            }
            dst_of.insert(&e.path, dst);
        } else {
            if !opts.file_exist_ok && (dst.exists() || !seen_files.insert(dst.clone())) {
                return Err(PipelineError::config_at("file path already exists", dst));
            }
            plan.units.push(Unit {
                src: e.path.clone(),
                dst,
            });
        }
    }
    Ok(plan)
}

/// Create the planned directories. Returns how many were created.
pub fn materialize_dirs(plan: &MirrorPlan) -> Result<usize> {
    for dir in &plan.dirs {
        std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    }
    // Skipped empty parents of non-empty folders still need to exist.
    for unit in &plan.units {
        if let Some(parent) = unit.dst.parent()
            && !parent.is_dir()
        {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
    }
    Ok(plan.dirs.len())
}
