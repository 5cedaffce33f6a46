//! Embedding generation
//!
//! The embedding capability turns an ordered batch of texts into an ordered,
//! positionally aligned batch of equal-length vectors.

mod http_backend;

pub use http_backend::*;

use crate::config::{EmbeddingConfig, RetryConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts; output order matches input order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig, retry: &RetryConfig) -> Result<Box<dyn Embedder>> {
    let embedder = HttpEmbedder::new(config, retry)?;
    Ok(Box::new(embedder))
}

/// Embed a single query string
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(vec![text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::Capability("Embedding service returned no vector".to_string()))
}

/// Check a batch reply lines up with its request
pub fn validate_batch(embeddings: &[Vec<f32>], expected_count: usize, dimension: usize) -> Result<()> {
    if embeddings.len() != expected_count {
        return Err(Error::Capability(format!(
            "Embedding count mismatch: sent {} texts, got {} vectors",
            expected_count,
            embeddings.len()
        )));
    }
    if let Some(mismatch) = embeddings.iter().find(|v| v.len() != dimension) {
        return Err(Error::Capability(format!(
            "Embedding dimension mismatch: expected {}, got {}",
            dimension,
            mismatch.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch() {
        let ok = vec![vec![0.0; 3], vec![1.0; 3]];
        assert!(validate_batch(&ok, 2, 3).is_ok());
        assert!(validate_batch(&ok, 3, 3).is_err());
        assert!(validate_batch(&ok, 2, 4).is_err());
    }
}
