use super::{validate_batch, Embedder};
use crate::backend::BackendClient;
use crate::config::{EmbeddingConfig, RetryConfig};
use crate::error::Result;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// Accepts the common reply shapes of embedding services
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum EmbeddingResponse {
    Data { data: Vec<EmbeddingData> },
    Embeddings { embeddings: Vec<Vec<f32>> },
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingResponse {
    fn into_embeddings(self) -> Vec<Vec<f32>> {
        match self {
            EmbeddingResponse::Embeddings { embeddings } => embeddings,
            EmbeddingResponse::Data { mut data } => {
                if data.iter().all(|d| d.index.is_some()) {
                    data.sort_by_key(|d| d.index);
                }
                data.into_iter().map(|d| d.embedding).collect()
            }
        }
    }
}

/// Embedder speaking the `/v1/embeddings` protocol
pub struct HttpEmbedder {
    client: BackendClient,
    model: String,
    dimension: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig, retry: &RetryConfig) -> Result<Self> {
        let client =
            BackendClient::from_env_key("Embedding", &config.base_url, &config.api_key_env, retry)?;
        Ok(Self {
            client,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.client = self.client.with_retry_policy(retry);
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding {} texts with {}", texts.len(), self.model);
        let request = EmbedRequest {
            model: &self.model,
            input: &texts,
        };
        let response: EmbeddingResponse = self.client.post_json("v1/embeddings", &request).await?;
        let embeddings = response.into_embeddings();
        validate_batch(&embeddings, texts.len(), self.dimension)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
