use super::Pipeline;
use crate::error::Result;
use crate::ocr::ExtractionMethod;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrOutcome {
    pub status: &'static str,
    pub page_count: usize,
    pub method: ExtractionMethod,
}

impl Pipeline {
    /// uploaded | error -> processing -> ocr_done
    pub async fn run_ocr(&self, document_id: &str) -> Result<OcrOutcome> {
        // A rejected claim leaves the document untouched
        self.registry.begin_processing(document_id).await?;

        match self.recognize(document_id).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.fail(document_id, e).await,
        }
    }

    async fn recognize(&self, document_id: &str) -> Result<OcrOutcome> {
        let doc = self.registry.require_document(document_id).await?;
        let bytes = self.blobs.get(&doc.storage_path).await?;
        let extracted = self.extractor.extract(&bytes, &doc.mime_type).await?;

        self.registry
            .complete_ocr(document_id, &extracted.text, extracted.page_count as i64)
            .await?;
        info!(
            "OCR done for {} ({} pages via {:?})",
            document_id, extracted.page_count, extracted.method
        );

        Ok(OcrOutcome {
            status: "ocr_done",
            page_count: extracted.page_count,
            method: extracted.method,
        })
    }
}
