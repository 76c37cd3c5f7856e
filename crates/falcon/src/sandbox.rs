//! Mount-point filter for the file-I/O builtins.
//!
//! `readFile` and `writeFile` only touch paths under a configured base
//! directory. Relative paths resolve under the base; absolute paths must
//! already live inside it. Escapes via `..` are rejected after
//! normalization.

use std::path::{Component, Path, PathBuf};

use crate::error::{FalconError, RunResult};

/// Base-directory guard applied to every file-I/O path.
#[derive(Debug, Clone)]
pub struct Sandbox {
    base: PathBuf,
}

impl Sandbox {
    /// Creates a sandbox rooted at `base`.
    #[must_use]
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Creates a sandbox rooted at the current working directory.
    pub fn current_dir() -> RunResult<Self> {
        let base = std::env::current_dir()
            .map_err(|err| FalconError::runtime(format!("cannot resolve working directory: {err}")))?;
        Ok(Self::new(base))
    }

    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Resolves `path` under the base directory, rejecting escapes.
    pub fn resolve(&self, path: &str) -> RunResult<PathBuf> {
        let requested = Path::new(path);
        let joined = if requested.is_absolute() {
            requested.to_path_buf()
        } else {
            self.base.join(requested)
        };
        let normalized = normalize(&joined);
        let base = normalize(&self.base);
        if normalized.starts_with(&base) {
            Ok(normalized)
        } else {
            Err(FalconError::runtime(
                "file operation outside the sandbox root is not allowed",
            ))
        }
    }
}

/// Lexical normalization: removes `.` and resolves `..` without touching
/// the filesystem, so the check also covers paths that do not exist yet.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
