//! Status command implementation

use super::open_registry;
use crate::config::{Config, DispatchMode};
use crate::error::Result;
use crate::meta::{Document, DocumentField, DocumentTag, RegistryStats};
use serde::Serialize;
use tracing::info;

const RECENT_DOCUMENTS: usize = 10;

/// Installation overview
#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub blob_dir: String,
    pub dispatch: DispatchMode,
    pub ocr_model: String,
    pub completion_model: String,
    pub embedding_model: String,
    pub stats: RegistryStats,
    pub recent: Vec<Document>,
}

/// One document with everything attached to it
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatusInfo {
    #[serde(flatten)]
    pub document: Document,
    pub tags: Vec<DocumentTag>,
    pub fields: Vec<DocumentField>,
    pub chunk_count: usize,
}

pub async fn cmd_status(config: &Config) -> Result<StatusInfo> {
    info!("Getting status");
    let registry = open_registry(config).await?;

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        blob_dir: config.blob_dir().display().to_string(),
        dispatch: config.pipeline.dispatch,
        ocr_model: config.ocr.model.clone(),
        completion_model: config.completion.model.clone(),
        embedding_model: config.embedding.model.clone(),
        stats: registry.get_stats().await?,
        recent: registry.list_documents(None, RECENT_DOCUMENTS).await?,
    })
}

pub async fn cmd_document_status(config: &Config, id: &str) -> Result<DocumentStatusInfo> {
    let registry = open_registry(config).await?;
    let document = registry.require_document(id).await?;
    Ok(DocumentStatusInfo {
        tags: registry.document_tags(id).await?,
        fields: registry.document_fields(id).await?,
        chunk_count: registry.count_embeddings(id).await?,
        document,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 docpipe Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("Blobs: {}", status.blob_dir);
    println!("Dispatch: {}", status.dispatch);
    println!("\nModels:");
    println!("  OCR: {}", status.ocr_model);
    println!("  Completion: {}", status.completion_model);
    println!("  Embedding: {}", status.embedding_model);

    println!("\nRegistry:");
    println!("  Documents: {}", status.stats.document_count);
    for (state, count) in &status.stats.by_status {
        println!("    {}: {}", state, count);
    }
    println!("  Tags: {}", status.stats.tag_count);
    println!("  Fields: {}", status.stats.field_count);
    println!("  Schemas: {}", status.stats.schema_count);
    println!("  Chunks: {}", status.stats.embedding_count);

    if status.recent.is_empty() {
        println!("\nNo documents yet. Use 'docpipe upload <file>' to add one.");
        return;
    }
    println!("\nRecent documents:");
    for doc in &status.recent {
        println!("  {} [{}] {}", doc.id, doc.status, doc.display_title());
    }
}

/// Print a single document's status
pub fn print_document_status(info: &DocumentStatusInfo) {
    let doc = &info.document;
    println!("\n📄 {}\n", doc.display_title());
    println!("ID: {}", doc.id);
    println!("File: {} ({}, {} bytes)", doc.original_filename, doc.mime_type, doc.file_size);
    println!("SHA-256: {}", doc.sha256);
    println!("Status: {}", doc.status);
    if let Some(err) = &doc.error_message {
        println!("Error: {}", err);
    }
    if let Some(doc_type) = &doc.document_type {
        println!("Type: {}", doc_type);
    }
    if let Some(pages) = doc.page_count {
        println!("Pages: {}", pages);
    }
    println!("Chunks: {}", info.chunk_count);

    if !info.tags.is_empty() {
        let names: Vec<_> = info
            .tags
            .iter()
            .map(|t| format!("{} ({})", t.name, t.source))
            .collect();
        println!("Tags: {}", names.join(", "));
    }
    if !info.fields.is_empty() {
        println!("Fields:");
        for field in &info.fields {
            println!(
                "  {} = {} [{}, {}]",
                field.field_name,
                field.field_value.as_deref().unwrap_or("-"),
                field.field_type,
                field.source
            );
        }
    }
    println!("Created: {}", doc.created_at);
    println!("Updated: {}", doc.updated_at);
}
