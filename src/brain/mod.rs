//! Prompt to artifact generation.
//!
//! Providers are tried in priority order. A provider without a credential is
//! skipped; a provider whose output cannot be parsed into an artifact with at
//! least one file counts as failed, and the next one is tried.

pub mod repair;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::adapters::{ChatCompletionProvider, CompletionProvider};
use crate::config::BrainConfig;
use crate::domain::BuildArtifact;

pub use repair::{parse_artifact, ParseError};

/// One provider's reason for not producing an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub reason: String,
}

impl fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.provider, self.reason)
    }
}

/// Generation errors
#[derive(Debug, Error)]
pub enum BrainError {
    #[error("No completion providers configured")]
    NoProviders,

    #[error("All completion providers failed: {}", join_failures(.0))]
    AllProvidersFailed(Vec<ProviderFailure>),
}

fn join_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Turns a natural-language prompt into a [`BuildArtifact`]
pub struct Brain {
    providers: Vec<Arc<dyn CompletionProvider>>,
    system_prompt: String,
}

impl Brain {
    pub fn new(providers: Vec<Arc<dyn CompletionProvider>>, system_prompt: impl Into<String>) -> Self {
        Self {
            providers,
            system_prompt: system_prompt.into(),
        }
    }

    /// Build one [`ChatCompletionProvider`] per configured provider
    pub fn from_config(config: &BrainConfig) -> Self {
        let providers = config
            .providers
            .iter()
            .map(|p| {
                Arc::new(ChatCompletionProvider::new(p.clone(), config.timeout()))
                    as Arc<dyn CompletionProvider>
            })
            .collect();
        Self::new(providers, config.system_prompt.clone())
    }

    /// Names of providers in priority order, with credential status
    pub fn providers(&self) -> Vec<(String, bool)> {
        self.providers
            .iter()
            .map(|p| (p.name().to_string(), p.has_credential()))
            .collect()
    }

    /// Generate an artifact, falling through providers until one succeeds
    #[instrument(skip(self, prompt), fields(prompt_chars = prompt.chars().count()))]
    pub async fn generate(&self, prompt: &str) -> Result<BuildArtifact, BrainError> {
        if self.providers.is_empty() {
            return Err(BrainError::NoProviders);
        }

        let user = user_message(prompt);
        let mut failures = Vec::new();

        for provider in &self.providers {
            if !provider.has_credential() {
                warn!(provider = provider.name(), "No API key, skipping");
                failures.push(ProviderFailure {
                    provider: provider.name().to_string(),
                    reason: "skipped, no API key".to_string(),
                });
                continue;
            }

            info!(provider = provider.name(), "Requesting completion");
            let outcome = match provider.complete(&self.system_prompt, &user).await {
                Ok(text) => parse_artifact(&text).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };

            match outcome {
                Ok(artifact) => {
                    info!(
                        provider = provider.name(),
                        project = %artifact.project_name,
                        files = artifact.files.len(),
                        "Artifact generated"
                    );
                    return Ok(artifact);
                }
                Err(reason) => {
                    warn!(provider = provider.name(), %reason, "Provider failed");
                    failures.push(ProviderFailure {
                        provider: provider.name().to_string(),
                        reason,
                    });
                }
            }
        }

        Err(BrainError::AllProvidersFailed(failures))
    }
}

/// Wrap the job prompt in the generation instruction
pub fn user_message(prompt: &str) -> String {
    format!("BUILD THIS:\n\n{}\n\nRespond with valid JSON only.", prompt)
}
