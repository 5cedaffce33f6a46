//! docpipe - document ingestion pipeline with hybrid search and RAG chat
//!
//! Uploaded PDFs and images are deduplicated by content digest, run through
//! OCR, classified and field-extracted by a completion model, chunked and
//! embedded. Ready documents are searchable by full-text and vector
//! similarity and serve as context for chat answers.

pub mod backend;
pub mod blob;
pub mod chat;
pub mod chunk;
pub mod classify;
pub mod commands;
pub mod config;
pub mod digest;
pub mod embed;
pub mod error;
pub mod llm;
pub mod meta;
pub mod ocr;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod search;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
