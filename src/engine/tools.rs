//! Path utilities: destination naming rules and external executable lookup.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{PipelineError, Result};

/// Convert absolute path to relative path from base
pub fn path_relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    path.strip_prefix(base).ok().map(|p| p.to_path_buf())
}

/// Custom naming rule: `(absolute source path, is_dir) -> destination name`.
pub type NamingFn = Arc<dyn Fn(&Path, bool) -> OsString + Send + Sync>;

/// Maps a source path to the name it gets under the destination root.
///
/// Pure: never touches the filesystem. The result is a single path component.
#[derive(Clone, Default)]
pub enum PathMapper {
    /// Keep the base name unchanged.
    #[default]
    KeepName,
    /// Files ending in `.from` become `.to`; other files and directories keep their name.
    SwapExtension { from: String, to: String },
    Custom(NamingFn),
}

impl PathMapper {
    pub fn swap_extension(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::SwapExtension {
            from: from.into().trim_start_matches('.').to_string(),
            to: to.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Path, bool) -> OsString + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Destination name for `src`.
    pub fn map(&self, src: &Path, is_dir: bool) -> OsString {
        let base = src.file_name().unwrap_or(src.as_os_str());
        match self {
            Self::KeepName => base.to_os_string(),
            Self::SwapExtension { from, to } => {
                if is_dir || src.extension() != Some(OsStr::new(from)) {
                    return base.to_os_string();
                }
                Path::new(base).with_extension(to).into_os_string()
            }
            Self::Custom(f) => f(src, is_dir),
        }
    }
}

impl fmt::Debug for PathMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeepName => write!(f, "KeepName"),
            Self::SwapExtension { from, to } => write!(f, "SwapExtension(.{from} -> .{to})"),
            Self::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Resolve `executable` against `software_dir` and require it to exist.
///
/// Returns the absolute path. A missing executable is a configuration error naming the path.
pub fn verify_executable(software_dir: &Path, executable: &Path) -> Result<PathBuf> {
    let joined = if executable.is_absolute() {
        executable.to_path_buf()
    } else {
        software_dir.join(executable)
    };
    let abs = std::path::absolute(&joined).map_err(|e| PipelineError::io(&joined, e))?;
    if !abs.is_file() {
        return Err(PipelineError::config_at("executable does not exist", abs));
    }
    Ok(abs)
}

/// Absolute form of `path` without resolving symlinks.
pub fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| PipelineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keep_name_returns_base_name() {
        let m = PathMapper::KeepName;
        assert_eq!(m.map(Path::new("/corpus/a/song.mid"), false), "song.mid");
        assert_eq!(m.map(Path::new("/corpus/a"), true), "a");
    }

    #[test]
    fn swap_extension_only_touches_matching_files() {
        let m = PathMapper::swap_extension(".mid", "abc");
        assert_eq!(m.map(Path::new("/c/song.mid"), false), "song.abc");
        assert_eq!(m.map(Path::new("/c/song.midi"), false), "song.midi");
        assert_eq!(m.map(Path::new("/c/dir.mid"), true), "dir.mid");
    }

    #[test]
    fn custom_rule_is_used() {
        let m = PathMapper::custom(|p, is_dir| {
            let mut s = p.file_name().unwrap_or_default().to_os_string();
            if !is_dir {
                s.push(".json");
            }
            s
        });
        assert_eq!(m.map(Path::new("/c/x.abc"), false), "x.abc.json");
        assert_eq!(m.map(Path::new("/c/d"), true), "d");
    }
}
