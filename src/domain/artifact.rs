//! Artifacts and per-run stage results.
//!
//! All of these are created fresh for each pipeline run and dropped once
//! logged.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The Brain's structured output: a named project and its virtual files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildArtifact {
    /// Project name chosen by the model
    #[serde(default = "default_project_name")]
    pub project_name: String,

    /// Files to materialize, relative to the output directory
    pub files: Vec<ArtifactFile>,

    /// Free-form notes from the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
}

fn default_project_name() -> String {
    "unnamed-project".to_string()
}

impl BuildArtifact {
    /// Create an artifact with no notes
    pub fn new(project_name: impl Into<String>, files: Vec<ArtifactFile>) -> Self {
        Self {
            project_name: project_name.into(),
            files,
            notes: None,
        }
    }

    /// Total content size in bytes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.content.len() as u64).sum()
    }
}

/// A single virtual file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
    pub path: String,
    pub content: String,
}

impl ArtifactFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Outcome of materializing an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub output_dir: PathBuf,
    pub files_written: usize,
}

/// Outcome of archiving the output directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZipResult {
    pub zip_path: PathBuf,
    pub bytes: u64,
}

/// Outcome of submitting an archive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,

    /// Raw remote response
    pub raw: Value,
}
