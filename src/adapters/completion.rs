//! OpenAI-compatible chat completion provider.
//!
//! Sends one system and one user message; the completion text is read from
//! `choices[0].message.content`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::config::ProviderConfig;

use super::http::{JsonClient, RemoteError};
use super::CompletionProvider;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// One configured chat-completion backend
pub struct ChatCompletionProvider {
    config: ProviderConfig,
    http: JsonClient,
    timeout: Duration,
}

impl ChatCompletionProvider {
    pub fn new(config: ProviderConfig, timeout: Duration) -> Self {
        let http = JsonClient::new("Completion", config.api_key.clone());
        Self {
            config,
            http,
            timeout,
        }
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn has_credential(&self) -> bool {
        self.config.has_credential()
    }

    #[instrument(skip(self, system, user), fields(provider = %self.config.name, model = %self.config.model))]
    async fn complete(&self, system: &str, user: &str) -> Result<String, RemoteError> {
        if !self.has_credential() {
            return Err(self
                .http
                .protocol_error(format!("{} API key not configured.", self.config.name)));
        }

        let request = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let body = serde_json::to_value(&request).map_err(|source| RemoteError::InvalidJson {
            service: self.http.service(),
            source,
        })?;

        let payload = self
            .http
            .request(Method::POST, &self.config.endpoint, Some(&body), self.timeout)
            .await?;

        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                self.http
                    .protocol_error(format!("{} returned no completion text.", self.config.name))
            })
    }
}
