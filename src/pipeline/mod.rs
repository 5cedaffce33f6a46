//! Document processing pipeline
//!
//! `upload -> ocr -> extract -> embed`. Each stage checks the document is in
//! its input status, does its work, persists its output together with the
//! status change, and then hands the document to the next stage through the
//! [`Dispatcher`]. A stage that fails after it has claimed the document
//! records the failure on the document before returning the error.

mod dispatch;
mod embed;
mod extract;
mod ocr;
mod upload;

pub use dispatch::*;
pub use embed::*;
pub use extract::*;
pub use ocr::*;
pub use upload::*;

use crate::blob::{BlobStore, FsBlobStore};
use crate::classify::Classifier;
use crate::config::{ChunkConfig, Config, DispatchMode};
use crate::embed::{Embedder, HttpEmbedder};
use crate::error::{Error, Result};
use crate::llm::HttpCompletionClient;
use crate::meta::{Document, DocumentStatus, Registry, Stage};
use crate::ocr::{HttpOcrClient, LopdfExtractor, TextExtractor};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

/// Output of whichever stage ran
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StageOutcome {
    Ocr(OcrOutcome),
    Extract(ExtractOutcome),
    Embed(EmbedOutcome),
}

/// The pieces a pipeline runs on
pub struct PipelineParts {
    pub registry: Registry,
    pub blobs: Arc<dyn BlobStore>,
    pub extractor: TextExtractor,
    pub classifier: Classifier,
    pub embedder: Arc<dyn Embedder>,
    pub chunk: ChunkConfig,
}

impl PipelineParts {
    /// Remote capabilities and local storage as named by the config
    pub fn from_config(config: &Config, registry: Registry) -> Result<Self> {
        let ocr = HttpOcrClient::new(&config.ocr, &config.retry)?;
        let extractor = TextExtractor::new(
            Arc::new(ocr),
            Arc::new(LopdfExtractor),
            config.ocr.min_chars_per_page,
        );
        let completion = HttpCompletionClient::new(&config.completion, &config.retry)?;
        let classifier = Classifier::new(Arc::new(completion), config.completion.clone());
        let embedder = HttpEmbedder::new(&config.embedding, &config.retry)?;

        Ok(Self {
            registry,
            blobs: Arc::new(FsBlobStore::new(config.blob_dir())),
            extractor,
            classifier,
            embedder: Arc::new(embedder),
            chunk: config.chunk.clone(),
        })
    }
}

pub struct Pipeline {
    registry: Registry,
    blobs: Arc<dyn BlobStore>,
    extractor: TextExtractor,
    classifier: Classifier,
    embedder: Arc<dyn Embedder>,
    chunk: ChunkConfig,
    dispatcher: Dispatcher,
}

impl Pipeline {
    pub fn new(parts: PipelineParts, dispatcher: Dispatcher) -> Self {
        Self {
            registry: parts.registry,
            blobs: parts.blobs,
            extractor: parts.extractor,
            classifier: parts.classifier,
            embedder: parts.embedder,
            chunk: parts.chunk,
            dispatcher,
        }
    }

    /// Build a pipeline whose stages chain the way `pipeline.dispatch` says.
    ///
    /// In-process dispatch spawns the worker, so this must run inside a
    /// tokio runtime.
    pub fn start(parts: PipelineParts, config: &Config) -> Result<Arc<Self>> {
        match config.pipeline.dispatch {
            DispatchMode::InProcess => {
                let (dispatcher, jobs) = Dispatcher::queue();
                let pipeline = Arc::new(Self::new(parts, dispatcher));
                spawn_worker(Arc::clone(&pipeline), jobs);
                info!("Pipeline started with in-process dispatch");
                Ok(pipeline)
            }
            DispatchMode::Http => {
                let dispatcher = Dispatcher::http(&config.server.public_url, &config.retry)?;
                info!(
                    "Pipeline started with HTTP dispatch to {}",
                    config.server.public_url
                );
                Ok(Arc::new(Self::new(parts, dispatcher)))
            }
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Run one stage, then hand the document to the next one
    pub async fn run_stage(&self, stage: Stage, document_id: &str) -> Result<StageOutcome> {
        let outcome = match stage {
            Stage::Ocr => StageOutcome::Ocr(self.run_ocr(document_id).await?),
            Stage::Extract => StageOutcome::Extract(self.run_extract(document_id).await?),
            Stage::Embed => StageOutcome::Embed(self.run_embed(document_id).await?),
        };
        if let Some(next) = stage.next() {
            self.dispatcher
                .dispatch(next, document_id, &self.registry)
                .await;
        }
        Ok(outcome)
    }

    /// Reset a document to the input status of `stage` and dispatch it
    pub async fn reprocess(&self, document_id: &str, stage: Stage) -> Result<()> {
        self.registry.reset_for_stage(document_id, stage).await?;
        self.dispatcher
            .dispatch(stage, document_id, &self.registry)
            .await;
        Ok(())
    }

    /// Drive a document through every remaining stage in this task,
    /// without dispatching. Returns the final row.
    pub async fn process(&self, document_id: &str) -> Result<Document> {
        let doc = self.registry.require_document(document_id).await?;
        let mut stage = match doc.get_status()? {
            DocumentStatus::Uploaded | DocumentStatus::Error => Some(Stage::Ocr),
            DocumentStatus::OcrDone => Some(Stage::Extract),
            DocumentStatus::Extracted => Some(Stage::Embed),
            DocumentStatus::Ready => None,
            DocumentStatus::Processing => {
                return Err(Error::Conflict(format!(
                    "Document {} is currently being processed",
                    document_id
                )))
            }
        };

        while let Some(current) = stage {
            match current {
                Stage::Ocr => {
                    self.run_ocr(document_id).await?;
                }
                Stage::Extract => {
                    self.run_extract(document_id).await?;
                }
                Stage::Embed => {
                    self.run_embed(document_id).await?;
                }
            }
            stage = current.next();
        }

        self.registry.require_document(document_id).await
    }

    /// Delete a document row and its blob
    pub async fn delete_document(&self, document_id: &str) -> Result<Document> {
        let doc = self.registry.delete_document(document_id).await?;
        self.blobs.delete(&doc.storage_path).await?;
        Ok(doc)
    }

    /// Record a stage failure on the document; the original error is returned
    async fn fail<T>(&self, document_id: &str, err: Error) -> Result<T> {
        if let Err(record_err) = self.registry.record_failure(document_id, &err.to_string()).await {
            error!(
                "Could not record failure of {} ({}): {}",
                document_id, err, record_err
            );
        }
        Err(err)
    }

    /// `ocr_text` a stage needs; its absence is fatal for the run
    fn require_ocr_text(doc: &Document) -> Result<&str> {
        doc.ocr_text
            .as_deref()
            .ok_or_else(|| Error::Storage(format!("Document {} has no OCR text", doc.id)))
    }

    /// Stage precondition; a mismatch is rejected and not written to the document
    fn require_status(doc: &Document, stage: Stage) -> Result<()> {
        let expected = stage.input_status();
        if doc.get_status()? != expected {
            return Err(Error::Conflict(format!(
                "Document {} is {}, {} stage needs {}",
                doc.id, doc.status, stage, expected
            )));
        }
        Ok(())
    }
}
