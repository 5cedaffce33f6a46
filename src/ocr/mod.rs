//! Text extraction for uploaded documents
//!
//! Images always go to the remote OCR capability. PDFs first try their
//! embedded text layer; when that averages fewer than `min_chars_per_page`
//! characters per page (typically a scan wrapped in a PDF) the original bytes
//! are sent to remote OCR instead.

mod http_backend;
mod pdf;

pub use http_backend::*;
pub use pdf::*;

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One page as returned by remote OCR
#[derive(Debug, Clone, PartialEq)]
pub struct OcrPage {
    pub markdown: String,
    /// (placeholder id, table markdown)
    pub tables: Vec<(String, String)>,
}

impl OcrPage {
    /// Page markdown with every `[id](id)` table placeholder replaced by its table
    pub fn render(&self) -> String {
        let mut text = self.markdown.clone();
        for (id, content) in &self.tables {
            text = text.replace(&format!("[{}]({})", id, id), content);
        }
        text
    }
}

/// Remote OCR capability
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize a whole document; pages come back in order
    async fn recognize(&self, bytes: &[u8], mime_type: &str) -> Result<Vec<OcrPage>>;
}

/// Local, non-OCR reading of a PDF text layer
pub trait TextLayerExtractor: Send + Sync {
    /// Text of each page in page order
    fn extract_pages(&self, bytes: &[u8]) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Image,
    Pdf,
}

impl DocumentKind {
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let mime = mime_type.split(';').next().unwrap_or_default().trim().to_lowercase();
        if mime == "application/pdf" {
            Some(DocumentKind::Pdf)
        } else if mime.starts_with("image/") {
            Some(DocumentKind::Image)
        } else {
            None
        }
    }
}

/// Which path produced the text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    TextLayer,
    RemoteOcr,
}

#[derive(Debug, Clone)]
pub struct ExtractedText {
    /// Page texts joined by a blank line
    pub text: String,
    pub page_count: usize,
    pub method: ExtractionMethod,
}

impl ExtractedText {
    fn from_pages(pages: Vec<String>, method: ExtractionMethod) -> Self {
        Self {
            page_count: pages.len(),
            text: pages.join("\n\n"),
            method,
        }
    }
}

/// Average characters per page, counting characters rather than bytes
pub fn average_chars_per_page(pages: &[String]) -> f64 {
    if pages.is_empty() {
        return 0.0;
    }
    let total: usize = pages.iter().map(|p| p.trim().chars().count()).sum();
    total as f64 / pages.len() as f64
}

/// Local-first text extraction with remote OCR fallback
#[derive(Clone)]
pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    text_layer: Arc<dyn TextLayerExtractor>,
    min_chars_per_page: usize,
}

impl TextExtractor {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        text_layer: Arc<dyn TextLayerExtractor>,
        min_chars_per_page: usize,
    ) -> Self {
        Self {
            engine,
            text_layer,
            min_chars_per_page,
        }
    }

    pub async fn extract(&self, bytes: &[u8], mime_type: &str) -> Result<ExtractedText> {
        let kind = DocumentKind::from_mime(mime_type)
            .ok_or_else(|| Error::Capability(format!("Unsupported mime type: {}", mime_type)))?;

        if kind == DocumentKind::Pdf {
            match self.read_text_layer(bytes).await {
                Ok(pages) => {
                    let average = average_chars_per_page(&pages);
                    if !pages.is_empty() && average >= self.min_chars_per_page as f64 {
                        info!(
                            "Using PDF text layer ({} pages, {:.0} chars/page)",
                            pages.len(),
                            average
                        );
                        return Ok(ExtractedText::from_pages(pages, ExtractionMethod::TextLayer));
                    }
                    debug!(
                        "Text layer too thin ({:.0} chars/page < {}); falling back to OCR",
                        average, self.min_chars_per_page
                    );
                }
                Err(e) => warn!("PDF text layer unreadable, falling back to OCR: {}", e),
            }
        }

        let pages = self.engine.recognize(bytes, mime_type).await?;
        let rendered: Vec<String> = pages.iter().map(OcrPage::render).collect();
        info!("Remote OCR returned {} pages", rendered.len());
        Ok(ExtractedText::from_pages(rendered, ExtractionMethod::RemoteOcr))
    }

    async fn read_text_layer(&self, bytes: &[u8]) -> Result<Vec<String>> {
        let text_layer = Arc::clone(&self.text_layer);
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || text_layer.extract_pages(&data))
            .await
            .map_err(|e| Error::Capability(format!("PDF extraction task failed: {}", e)))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// OCR fake that counts calls and returns fixed pages
    pub(crate) struct FakeOcr {
        pub calls: AtomicUsize,
        pub pages: Vec<String>,
        pub fail_with: Option<String>,
        pub delay: Option<Duration>,
    }

    impl FakeOcr {
        pub(crate) fn returning(pages: &[&str]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                pages: pages.iter().map(|p| p.to_string()).collect(),
                fail_with: None,
                delay: None,
            }
        }

        /// Answers like [`FakeOcr::returning`] after `delay`
        pub(crate) fn slow(pages: &[&str], delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::returning(pages)
            }
        }

        pub(crate) fn failing(message: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                pages: Vec::new(),
                fail_with: Some(message.to_string()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FakeOcr {
        async fn recognize(&self, _bytes: &[u8], _mime_type: &str) -> Result<Vec<OcrPage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(message) = &self.fail_with {
                return Err(Error::Capability(message.clone()));
            }
            Ok(self
                .pages
                .iter()
                .map(|p| OcrPage {
                    markdown: p.clone(),
                    tables: Vec::new(),
                })
                .collect())
        }
    }

    pub(crate) struct FixedTextLayer(pub Vec<String>);

    impl TextLayerExtractor for FixedTextLayer {
        fn extract_pages(&self, _bytes: &[u8]) -> Result<Vec<String>> {
            Ok(self.0.clone())
        }
    }

    fn extractor(ocr: Arc<FakeOcr>, layer: Vec<String>) -> TextExtractor {
        TextExtractor::new(ocr, Arc::new(FixedTextLayer(layer)), 50)
    }

    #[tokio::test]
    async fn test_rich_text_layer_skips_ocr() {
        let ocr = Arc::new(FakeOcr::returning(&["ocr"]));
        let page = "x".repeat(60);
        let out = extractor(ocr.clone(), vec![page.clone(), page.clone()])
            .extract(b"%PDF", "application/pdf")
            .await
            .unwrap();

        assert_eq!(out.method, ExtractionMethod::TextLayer);
        assert_eq!(out.page_count, 2);
        assert_eq!(out.text, format!("{}\n\n{}", page, page));
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_thin_text_layer_falls_back() {
        let ocr = Arc::new(FakeOcr::returning(&["scanned page one", "scanned page two"]));
        // 90 chars over 2 pages = 45 avg, below 50
        let out = extractor(ocr.clone(), vec!["y".repeat(90), String::new()])
            .extract(b"%PDF", "application/pdf")
            .await
            .unwrap();

        assert_eq!(out.method, ExtractionMethod::RemoteOcr);
        assert_eq!(out.page_count, 2);
        assert_eq!(out.text, "scanned page one\n\nscanned page two");
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let ocr = Arc::new(FakeOcr::returning(&["ocr"]));
        let out = extractor(ocr.clone(), vec!["z".repeat(50)])
            .extract(b"%PDF", "application/pdf")
            .await
            .unwrap();
        assert_eq!(out.method, ExtractionMethod::TextLayer);
    }

    #[tokio::test]
    async fn test_images_always_use_ocr() {
        let ocr = Arc::new(FakeOcr::returning(&["receipt"]));
        let out = extractor(ocr.clone(), vec!["x".repeat(500)])
            .extract(&[0x89, 0x50], "image/png")
            .await
            .unwrap();
        assert_eq!(out.method, ExtractionMethod::RemoteOcr);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_real_pdf_through_lopdf() {
        let ocr = Arc::new(FakeOcr::returning(&["ocr"]));
        let long_line = "Digital invoice with a real text layer and plenty of characters";
        let pdf = crate::ocr::pdf::tests::synthetic_pdf(&[long_line]);
        let out = TextExtractor::new(ocr.clone(), Arc::new(LopdfExtractor), 50)
            .extract(&pdf, "application/pdf")
            .await
            .unwrap();
        assert_eq!(out.method, ExtractionMethod::TextLayer);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);

        let short = crate::ocr::pdf::tests::synthetic_pdf(&["x"]);
        let out = TextExtractor::new(ocr.clone(), Arc::new(LopdfExtractor), 50)
            .extract(&short, "application/pdf")
            .await
            .unwrap();
        assert_eq!(out.method, ExtractionMethod::RemoteOcr);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsupported_mime() {
        let ocr = Arc::new(FakeOcr::returning(&[]));
        let err = extractor(ocr, vec![])
            .extract(b"hi", "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Capability(_)));
    }

    #[test]
    fn test_table_splicing() {
        let page = OcrPage {
            markdown: "Header\n[t1](t1)\nFooter [t2](t2)".to_string(),
            tables: vec![
                ("t1".to_string(), "|a|".to_string()),
                ("t2".to_string(), "|b|".to_string()),
            ],
        };
        assert_eq!(page.render(), "Header\n|a|\nFooter |b|");
    }
}
