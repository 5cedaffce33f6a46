use super::Pipeline;
use crate::chunk::chunk_text;
use crate::embed::validate_batch;
use crate::error::Result;
use crate::meta::{Document, Stage};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbedOutcome {
    pub status: &'static str,
    pub chunks: usize,
}

impl Pipeline {
    /// extracted -> ready: chunk, embed in one batch, replace stored vectors
    pub async fn run_embed(&self, document_id: &str) -> Result<EmbedOutcome> {
        let doc = self.registry.require_document(document_id).await?;
        Self::require_status(&doc, Stage::Embed)?;

        match self.embed_document(&doc).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.fail(document_id, e).await,
        }
    }

    async fn embed_document(&self, doc: &Document) -> Result<EmbedOutcome> {
        let ocr_text = Self::require_ocr_text(doc)?;
        let chunks = chunk_text(ocr_text, &self.chunk)?;

        let rows: Vec<(String, Vec<f32>)> = if chunks.is_empty() {
            debug!("Document {} has no text to embed", doc.id);
            Vec::new()
        } else {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(texts.clone()).await?;
            validate_batch(&vectors, texts.len(), self.embedder.dimension())?;
            texts.into_iter().zip(vectors).collect()
        };

        self.registry.complete_embedding(&doc.id, &rows).await?;
        info!("Embedded {} ({} chunks)", doc.id, rows.len());

        Ok(EmbedOutcome {
            status: "ready",
            chunks: rows.len(),
        })
    }
}
