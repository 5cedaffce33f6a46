//! Local PDF text layer extraction using lopdf

use super::TextLayerExtractor;
use crate::error::{Error, Result};
use lopdf::Document;
use tracing::debug;

/// Reads the embedded text layer of a PDF, page by page
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfExtractor;

impl TextLayerExtractor for LopdfExtractor {
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| Error::Capability(format!("Failed to load PDF: {}", e)))?;

        let pages = doc.get_pages();
        let mut texts = Vec::with_capacity(pages.len());
        for page_num in pages.keys() {
            match doc.extract_text(&[*page_num]) {
                Ok(text) => texts.push(text.trim().to_string()),
                Err(e) => {
                    // Pages without a decodable text layer count as empty
                    debug!("No text layer on page {}: {}", page_num, e);
                    texts.push(String::new());
                }
            }
        }
        Ok(texts)
    }
}
