use super::{ChatMessage, CompletionClient, CompletionRequest};
use crate::backend::BackendClient;
use crate::config::{CompletionConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completion client speaking the `/v1/chat/completions` protocol
pub struct HttpCompletionClient {
    client: BackendClient,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(config: &CompletionConfig, retry: &RetryConfig) -> Result<Self> {
        let client =
            BackendClient::from_env_key("Completion", &config.base_url, &config.api_key_env, retry)?;
        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client = self.client.with_retry_policy(retry);
        self
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        debug!(
            "Completion with {} messages (json_mode={})",
            request.messages.len(),
            request.json_mode
        );
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: &request.messages,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
            temperature: request.temperature,
        };

        let response: ChatCompletionResponse =
            self.client.post_json("v1/chat/completions", &body).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Capability("Completion returned no content".to_string()))
    }
}
