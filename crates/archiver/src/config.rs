//! Archiver executable lookup.

use crate::error::ArchiverError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable that overrides executable lookup.
pub const BINARY_ENV: &str = "ARCHIVER_7Z_BIN";

/// Executable names tried in order.
pub const BINARY_CANDIDATES: [&str; 3] = ["7zz", "7z", "7za"];

/// Resolved configuration shared by every operation.
///
/// Built once and treated as read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiverConfig {
    /// Path to the 7-Zip executable
    pub binary: PathBuf,
}

impl ArchiverConfig {
    /// Use `binary` as-is, without checking that it exists.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate the archiver executable.
    ///
    /// Order: `explicit`, then [`BINARY_ENV`], then a `bin/` directory next
    /// to the running executable, then each of [`BINARY_CANDIDATES`] on `PATH`.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ArchiverError> {
        if let Some(path) = explicit {
            return Ok(Self::with_binary(path));
        }

        if let Some(path) = std::env::var_os(BINARY_ENV).filter(|v| !v.is_empty()) {
            debug!(binary = ?path, "using archiver from environment");
            return Ok(Self::with_binary(path));
        }

        let bundled = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("bin")));
        let path_dirs = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect::<Vec<_>>())
            .unwrap_or_default();

        let dirs = bundled.into_iter().chain(path_dirs);
        find_in_dirs(dirs)
            .map(Self::with_binary)
            .ok_or_else(|| ArchiverError::BinaryNotFound(BINARY_CANDIDATES.join(", ")))
    }
}

fn find_in_dirs(dirs: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    let dirs: Vec<PathBuf> = dirs.into_iter().collect();
    for name in BINARY_CANDIDATES {
        for dir in &dirs {
            let candidate = dir.join(executable_name(name));
            if is_executable(&candidate) {
                debug!(binary = %candidate.display(), "found archiver");
                return Some(candidate);
            }
        }
    }
    None
}

fn executable_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
