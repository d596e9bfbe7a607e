//! Job marketplace client.
//!
//! Endpoints (relative to the configured base URLs):
//! - `GET  {v2}/jobs?limit=N&offset=M`: paged job listing
//! - `POST {v1}/upload`: base64 file upload
//! - `POST {v2}/jobs/{id}/respond`: job response
//!
//! Auth: Bearer token

use std::path::Path;

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use crate::config::MarketplaceConfig;
use crate::core::lookup::deep_find_prompt;
use crate::domain::{PollResult, SubmissionResult, Upload, UploadedFile};

use super::http::{JsonClient, RemoteError};
use super::Marketplace;

/// Job statuses that can no longer take a response
const TERMINAL_STATUSES: &[&str] = &["completed", "cancelled"];

/// HTTP client for the job marketplace
pub struct MarketplaceClient {
    config: MarketplaceConfig,
    http: JsonClient,
}

impl MarketplaceClient {
    pub fn new(config: MarketplaceConfig) -> Self {
        let http = JsonClient::new("Marketplace", config.api_key.clone());
        Self { config, http }
    }

    fn jobs_url(&self, offset: usize) -> String {
        format!(
            "{}/jobs?limit={}&offset={}",
            self.config.v2_url.trim_end_matches('/'),
            self.config.page_size,
            offset
        )
    }

    fn upload_url(&self) -> String {
        format!("{}/upload", self.config.v1_url.trim_end_matches('/'))
    }

    fn respond_url(&self, job_id: &str) -> String {
        format!(
            "{}/jobs/{}/respond",
            self.config.v2_url.trim_end_matches('/'),
            job_id
        )
    }
}

#[async_trait]
impl Marketplace for MarketplaceClient {
    #[instrument(skip(self))]
    async fn poll_prompt(&self) -> Result<PollResult, RemoteError> {
        let mut pages = Vec::new();
        let mut checked = 0usize;
        let mut open = 0usize;

        for page in 0..self.config.max_pages.max(1) {
            let url = self.jobs_url(page * self.config.page_size);
            let payload = self
                .http
                .request(Method::GET, &url, None, self.config.poll_timeout())
                .await?;

            let jobs = payload
                .get("jobs")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for job in &jobs {
                checked += 1;
                if is_terminal(job) {
                    continue;
                }
                open += 1;

                if let Some(prompt) = deep_find_prompt(job) {
                    let job_id = job_id(job);
                    info!(job_id = ?job_id, "Prompt found in open job");
                    return Ok(PollResult::found(prompt, job_id, job.clone()));
                }
            }

            let short_page = jobs.len() < self.config.page_size;
            pages.push(payload);
            if short_page {
                break;
            }
        }

        debug!(checked, open, "No prompt available");
        let raw = if pages.len() == 1 {
            pages.remove(0)
        } else {
            Value::Array(pages)
        };
        Ok(PollResult::waiting(
            format!("No prompt found in {} job(s) ({} open).", checked, open),
            raw,
        ))
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn upload_file(&self, path: &Path) -> Result<Upload, RemoteError> {
        let bytes = tokio::fs::read(path).await.map_err(|source| RemoteError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload.bin".to_string());

        let body = json!({
            "files": [{
                "name": name,
                "content": BASE64_STANDARD.encode(&bytes),
                "type": mime_for(path),
            }]
        });

        let payload = self
            .http
            .request(
                Method::POST,
                &self.upload_url(),
                Some(&body),
                self.config.upload_timeout(),
            )
            .await?;

        if payload.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(self.http.protocol_error("File upload failed."));
        }

        let file = payload
            .get("files")
            .and_then(Value::as_array)
            .and_then(|files| files.first())
            .cloned()
            .ok_or_else(|| self.http.protocol_error("Upload returned no file descriptor."))?;

        let uploaded: UploadedFile = serde_json::from_value(file).map_err(|e| {
            self.http
                .protocol_error(format!("Upload returned an invalid file descriptor: {}", e))
        })?;

        info!(url = %uploaded.url, bytes = bytes.len(), "File uploaded");
        Ok(Upload {
            file: uploaded,
            raw: payload,
        })
    }

    #[instrument(skip(self, content, attachments), fields(attachments = attachments.len()))]
    async fn submit_response(
        &self,
        job_id: &str,
        content: &str,
        attachments: &[UploadedFile],
    ) -> Result<SubmissionResult, RemoteError> {
        let mut body = json!({
            "content": content,
            "responseType": if attachments.is_empty() { "TEXT" } else { "FILE" },
        });
        if !attachments.is_empty() {
            body["files"] = serde_json::to_value(attachments).map_err(|e| {
                self.http
                    .protocol_error(format!("Failed to encode attachments: {}", e))
            })?;
        }

        let payload = self
            .http
            .request(
                Method::POST,
                &self.respond_url(job_id),
                Some(&body),
                self.config.respond_timeout(),
            )
            .await?;

        let submission_id = ["responseId", "submissionId", "id"]
            .iter()
            .find_map(|key| payload.get(*key).and_then(id_string));

        info!(job_id, submission_id = ?submission_id, "Response submitted");
        Ok(SubmissionResult {
            submission_id,
            raw: payload,
        })
    }
}

fn is_terminal(job: &Value) -> bool {
    job.get("status")
        .and_then(Value::as_str)
        .is_some_and(|status| {
            TERMINAL_STATUSES
                .iter()
                .any(|t| status.eq_ignore_ascii_case(t))
        })
}

fn job_id(job: &Value) -> Option<String> {
    job.get("id").and_then(id_string)
}

/// Ids arrive as strings or numbers
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// MIME type from the file extension
pub fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("zip") => "application/zip",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
