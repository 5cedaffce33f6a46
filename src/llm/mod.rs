//! Completion capability
//!
//! Chat-style completions used by classification, field extraction and the
//! chat retriever. JSON mode asks the service for a single JSON object; the
//! caller still validates the shape of whatever comes back.

mod http_backend;

pub use http_backend::*;

use crate::config::{CompletionConfig, RetryConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask for a single JSON object as the reply
    pub json_mode: bool,
    pub temperature: Option<f32>,
}

/// Trait for completion providers
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Return the text of the first completion choice
    async fn complete(&self, request: CompletionRequest) -> Result<String>;
}

/// Create a completion client based on configuration
pub fn create_completion_client(
    config: &CompletionConfig,
    retry: &RetryConfig,
) -> Result<Box<dyn CompletionClient>> {
    Ok(Box::new(HttpCompletionClient::new(config, retry)?))
}

/// Run a JSON-mode completion and parse the reply as a JSON object
pub async fn complete_json(
    client: &dyn CompletionClient,
    messages: Vec<ChatMessage>,
) -> Result<Value> {
    let reply = client
        .complete(CompletionRequest {
            messages,
            json_mode: true,
            temperature: Some(0.0),
        })
        .await?;
    parse_json_reply(&reply)
}

/// Parse a completion reply that should hold one JSON object.
///
/// Tolerates a surrounding markdown code fence.
pub fn parse_json_reply(reply: &str) -> Result<Value> {
    let trimmed = reply.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let value: Value = serde_json::from_str(body).map_err(|e| {
        Error::Capability(format!("Completion did not return valid JSON: {}", e))
    })?;
    if !value.is_object() {
        return Err(Error::Capability(
            "Completion JSON is not an object".to_string(),
        ));
    }
    Ok(value)
}
