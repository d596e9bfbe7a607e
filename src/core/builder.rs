//! Materializes a generated artifact into the output directory.
//!
//! The output directory is wiped and recreated on every run; its previous
//! contents are never merged.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument};

use crate::domain::{BuildArtifact, BuildResult};

use super::safety::{resolve_within, SafetyLimits, SafetyViolation};

/// Errors from materializing an artifact
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Unsafe(#[from] SafetyViolation),

    #[error("Failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes artifacts into a single sandboxed output directory
#[derive(Debug, Clone)]
pub struct Builder {
    output_dir: PathBuf,
    limits: SafetyLimits,
}

impl Builder {
    pub fn new(output_dir: impl Into<PathBuf>, limits: SafetyLimits) -> Self {
        Self {
            output_dir: output_dir.into(),
            limits,
        }
    }

    /// Replace the output directory's contents with the artifact's files.
    ///
    /// Every path is checked before the directory is touched, so an unsafe
    /// artifact fails without writing anything.
    #[instrument(skip(self, artifact), fields(project = %artifact.project_name, files = artifact.files.len()))]
    pub async fn materialize(&self, artifact: &BuildArtifact) -> Result<BuildResult, BuildError> {
        self.limits.validate_artifact(&self.output_dir, artifact)?;

        match fs::remove_dir_all(&self.output_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(BuildError::Io {
                    action: "clear",
                    path: self.output_dir.clone(),
                    source,
                })
            }
        }
        create_dir(&self.output_dir).await?;

        let mut files_written = 0;
        for file in &artifact.files {
            let target = resolve_within(&self.output_dir, &file.path)?;
            if let Some(parent) = target.parent() {
                create_dir(parent).await?;
            }

            fs::write(&target, &file.content)
                .await
                .map_err(|source| BuildError::Io {
                    action: "write",
                    path: target.clone(),
                    source,
                })?;

            debug!(path = %target.display(), bytes = file.content.len(), "Wrote file");
            files_written += 1;
        }

        info!(files_written, output_dir = %self.output_dir.display(), "Artifact materialized");

        Ok(BuildResult {
            output_dir: self.output_dir.clone(),
            files_written,
        })
    }
}

async fn create_dir(path: &Path) -> Result<(), BuildError> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| BuildError::Io {
            action: "create directory",
            path: path.to_path_buf(),
            source,
        })
}
