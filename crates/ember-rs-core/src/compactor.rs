//! Compactor abstraction and the chat-completions client that implements it.

use crate::error::CompactorError;
use async_trait::async_trait;
use ember_rs_config::{CompactorConfig, EmberConfig};
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Merges the current memory document with a transcript into a new document.
///
/// Output is untrusted text; callers validate it before committing.
#[async_trait]
pub trait Compactor: Send + Sync {
    async fn compact(&self, old_document: &str, transcript: &str)
    -> Result<String, CompactorError>;
}

/// Build the merge instruction sent to the model.
pub fn build_prompt(old_document: &str, transcript: &str, target_bytes: usize) -> String {
    let target_kb = (target_bytes / 1024).max(1);
    format!(
        "You are the long-term memory manager of a companion device.\n\
         \n\
         Merge the existing memory document with the new conversation and \
         produce a compacted memory document.\n\
         \n\
         Existing memory (JSON):\n\
         {old_document}\n\
         \n\
         New conversation:\n\
         {transcript}\n\
         \n\
         Requirements:\n\
         1. Keep every important fact about the user and their preferences.\n\
         2. Merge similar memories and drop redundant ones.\n\
         3. The result must be a single JSON object.\n\
         4. Keep the whole document under {target_kb}KB.\n\
         5. Use short, plain summaries.\n\
         6. Include the version, metadata, user_profile, memories and recent_context fields.\n\
         7. Set metadata.total_memories to the number of entries in memories.\n\
         8. Give every memory an importance between 0.0 and 1.0.\n\
         9. Return only the JSON, with no explanation."
    )
}

/// Compactor backed by an OpenAI-compatible `chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompactor {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
    target_bytes: usize,
}

impl ChatCompactor {
    /// Create a client for `config` authenticated with `api_key`.
    pub fn new(
        config: &CompactorConfig,
        api_key: impl Into<String>,
        target_bytes: usize,
    ) -> Result<Self, CompactorError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(CompactorError::MissingCredential);
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        info!(
            "chat compactor ready (endpoint={}, model={})",
            config.endpoint, config.model
        );
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            target_bytes,
        })
    }

    /// Create a client from the full config, using its device credential.
    pub fn from_config(config: &EmberConfig) -> Result<Self, CompactorError> {
        let api_key = config
            .device
            .credential()
            .ok_or(CompactorError::MissingCredential)?;
        Self::new(
            &config.compactor,
            api_key,
            config.pipeline.target_document_bytes,
        )
    }
}

#[async_trait]
impl Compactor for ChatCompactor {
    async fn compact(
        &self,
        old_document: &str,
        transcript: &str,
    ) -> Result<String, CompactorError> {
        let prompt = build_prompt(old_document, transcript, self.target_bytes);
        debug!(
            "sending compaction request (model={}, prompt_len={})",
            self.model,
            prompt.len()
        );
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CompactorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| CompactorError::Malformed(err.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| CompactorError::Malformed("no choices in response".to_string()))?
            .message
            .content
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(CompactorError::EmptyResponse);
        }
        info!("received compacted memory (bytes={})", content.len());
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}
