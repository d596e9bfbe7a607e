//! Safety limits and enforcement for generated artifacts.
//!
//! Prevents a generated artifact from escaping the output sandbox through:
//! - Relative paths that climb out of the output directory (`..`)
//! - Absolute paths
//! - Excessive file counts or file sizes

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::BuildArtifact;

/// Safety limits for materializing an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Maximum number of files per artifact (default: 500)
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// Maximum size of a single file in bytes (default: 5MB)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

fn default_max_files() -> usize {
    500
}
fn default_max_file_bytes() -> u64 {
    5 * 1024 * 1024
} // 5MB

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

impl SafetyLimits {
    /// Check an artifact against count and size limits, and every path
    /// against the sandbox, before anything touches the disk
    pub fn validate_artifact(&self, root: &Path, artifact: &BuildArtifact) -> Result<(), SafetyViolation> {
        if artifact.files.len() > self.max_files {
            return Err(SafetyViolation::TooManyFiles {
                actual: artifact.files.len(),
                limit: self.max_files,
            });
        }

        for file in &artifact.files {
            let size = file.content.len() as u64;
            if size > self.max_file_bytes {
                return Err(SafetyViolation::FileTooLarge {
                    path: file.path.clone(),
                    actual: size,
                    limit: self.max_file_bytes,
                });
            }
            resolve_within(root, &file.path)?;
        }

        Ok(())
    }
}

/// Resolve `relative` against `root`, refusing anything that would land
/// outside `root` or on `root` itself.
///
/// Resolution is lexical: `.` is dropped and `..` pops a component, so no
/// filesystem access is needed. Backslashes are treated as separators.
pub fn resolve_within(root: &Path, relative: &str) -> Result<PathBuf, SafetyViolation> {
    let normalized = relative.replace('\\', "/");
    if normalized.trim().is_empty() {
        return Err(SafetyViolation::EmptyPath);
    }

    let candidate = Path::new(&normalized);
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();

    for component in candidate.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(SafetyViolation::PathEscapesRoot {
                        path: relative.to_string(),
                    });
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(SafetyViolation::AbsolutePath {
                    path: relative.to_string(),
                });
            }
        }
    }

    if parts.is_empty() {
        return Err(SafetyViolation::PathEscapesRoot {
            path: relative.to_string(),
        });
    }

    let mut resolved = root.to_path_buf();
    resolved.extend(parts);
    Ok(resolved)
}

/// Safety violation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafetyViolation {
    #[error("Unsafe output path detected: empty path")]
    EmptyPath,

    #[error("Unsafe output path detected: absolute path {path}")]
    AbsolutePath { path: String },

    #[error("Unsafe output path detected: {path} escapes the output directory")]
    PathEscapesRoot { path: String },

    #[error("Maximum files exceeded: {actual} > {limit}")]
    TooManyFiles { actual: usize, limit: usize },

    #[error("File {path} too large: {actual} > {limit} bytes")]
    FileTooLarge { path: String, actual: u64, limit: u64 },
}
