//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the two remote collaborators:
//! the job marketplace and the completion providers.

pub mod completion;
pub mod http;
pub mod marketplace;

use std::path::Path;

use async_trait::async_trait;

use crate::domain::{PollResult, SubmissionResult, Upload, UploadedFile};

pub use completion::ChatCompletionProvider;
pub use http::{JsonClient, RemoteError};
pub use marketplace::MarketplaceClient;

/// Typed access to the job marketplace
#[async_trait]
pub trait Marketplace: Send + Sync {
    /// Look through open jobs for a usable prompt
    async fn poll_prompt(&self) -> Result<PollResult, RemoteError>;

    /// Upload a file as a base64 attachment
    async fn upload_file(&self, path: &Path) -> Result<Upload, RemoteError>;

    /// Respond to a job; `FILE` response type when attachments are present
    async fn submit_response(
        &self,
        job_id: &str,
        content: &str,
        attachments: &[UploadedFile],
    ) -> Result<SubmissionResult, RemoteError>;
}

/// A text-generation backend
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Providers without a credential are skipped
    fn has_credential(&self) -> bool;

    /// Return the completion text for a system + user message pair
    async fn complete(&self, system: &str, user: &str) -> Result<String, RemoteError>;
}
