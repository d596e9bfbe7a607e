//! Marketplace-facing types: poll outcomes and uploaded file descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of one watcher cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// Id of the job that owns the prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Human-readable summary
    pub reason: String,

    /// Raw remote payload
    pub raw: Value,
}

impl PollResult {
    /// A prompt was found
    pub fn found(prompt: String, job_id: Option<String>, raw: Value) -> Self {
        Self {
            ready: true,
            prompt: Some(prompt),
            job_id,
            reason: "Mystery prompt detected.".to_string(),
            raw,
        }
    }

    /// Nothing to do this cycle
    pub fn waiting(reason: impl Into<String>, raw: Value) -> Self {
        Self {
            ready: false,
            prompt: None,
            job_id: None,
            reason: reason.into(),
            raw,
        }
    }
}

/// File descriptor returned by the marketplace upload endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub mime_type: String,
}

/// A completed upload: the first file descriptor plus the full response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Upload {
    pub file: UploadedFile,
    pub raw: Value,
}
