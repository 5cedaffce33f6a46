use super::Pipeline;
use crate::digest::{digest, storage_path};
use crate::error::{Error, Result};
use crate::meta::{Document, DocumentStatus, Stage};
use crate::ocr::DocumentKind;
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub id: String,
    pub status: DocumentStatus,
}

/// Content type from the client, or guessed from the filename
pub fn resolve_mime(filename: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(mime) if !mime.is_empty() && mime != "application/octet-stream" => mime.to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

impl Pipeline {
    /// Register new content and start the pipeline for it.
    ///
    /// Known content is answered with `Error::Duplicate` before anything is
    /// written. The blob is stored before the row so no row ever points at a
    /// missing blob.
    pub async fn upload(
        &self,
        filename: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<UploadOutcome> {
        if bytes.is_empty() {
            return Err(Error::Validation("Uploaded file is empty".to_string()));
        }
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(Error::Validation("Uploaded file has no name".to_string()));
        }
        let mime_type = resolve_mime(filename, content_type);
        if DocumentKind::from_mime(&mime_type).is_none() {
            return Err(Error::Validation(format!(
                "Unsupported file type {}; upload a PDF or an image",
                mime_type
            )));
        }

        let sha256 = digest(bytes);
        if let Some(existing) = self.registry.find_by_sha256(&sha256).await? {
            info!("{} duplicates document {}", filename, existing.id);
            return Err(Error::Duplicate {
                existing_id: existing.id,
            });
        }

        let path = storage_path(&sha256, filename);
        self.blobs.put(&path, bytes, &mime_type).await?;
        debug!("Stored {} bytes at {}", bytes.len(), path);

        let doc = Document::new(
            sha256,
            path,
            filename.to_string(),
            mime_type,
            bytes.len() as i64,
        );
        if let Err(err) = self.registry.insert_document(&doc).await {
            if let Error::Duplicate { existing_id } = &err {
                self.discard_losing_blob(existing_id, &doc.storage_path).await;
            }
            return Err(err);
        }
        info!("Uploaded {} as {}", doc.original_filename, doc.id);

        self.dispatcher
            .dispatch(Stage::Ocr, &doc.id, &self.registry)
            .await;

        Ok(UploadOutcome {
            id: doc.id,
            status: DocumentStatus::Uploaded,
        })
    }

    /// A concurrent upload of the same bytes under another name won the insert
    async fn discard_losing_blob(&self, existing_id: &str, path: &str) {
        let winner_path = match self.registry.get_document(existing_id).await {
            Ok(Some(winner)) => winner.storage_path,
            _ => return,
        };
        if winner_path != path {
            if let Err(e) = self.blobs.delete(path).await {
                warn!("Could not remove orphaned blob {}: {}", path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::tests::FakeOcr;
    use crate::pipeline::tests::{harness, FakeEmbedder};
    use std::sync::Arc;

    #[test]
    fn test_resolve_mime() {
        assert_eq!(resolve_mime("a.pdf", None), "application/pdf");
        assert_eq!(resolve_mime("a.PNG", Some("")), "image/png");
        assert_eq!(resolve_mime("a.bin", Some("image/tiff")), "image/tiff");
        assert_eq!(
            resolve_mime("scan.jpg", Some("application/octet-stream")),
            "image/jpeg"
        );
    }

    #[tokio::test]
    async fn test_duplicate_upload_returns_existing_id() {
        let h = harness(FakeOcr::returning(&[]), vec![], FakeEmbedder::new(4)).await;

        let first = h
            .pipeline
            .upload("a.pdf", Some("application/pdf"), b"%PDF same bytes")
            .await
            .unwrap();
        assert_eq!(first.status, DocumentStatus::Uploaded);

        let err = h
            .pipeline
            .upload("b.pdf", Some("application/pdf"), b"%PDF same bytes")
            .await
            .unwrap_err();
        match err {
            Error::Duplicate { existing_id } => assert_eq!(existing_id, first.id),
            other => panic!("expected duplicate, got {other:?}"),
        }

        let stats = h.registry().get_stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        let second_path = storage_path(&digest(b"%PDF same bytes"), "b.pdf");
        assert!(!h.pipeline.blobs().exists(&second_path).await.unwrap());
    }

    #[tokio::test]
    async fn test_one_byte_difference_is_new_document() {
        let h = harness(FakeOcr::returning(&[]), vec![], FakeEmbedder::new(4)).await;
        let a = h.pipeline.upload("a.png", None, b"image-a").await.unwrap();
        let b = h.pipeline.upload("a.png", None, b"image-b").await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_concurrent_identical_uploads_yield_one_row() {
        let h = Arc::new(harness(FakeOcr::returning(&[]), vec![], FakeEmbedder::new(4)).await);

        let mut handles = Vec::new();
        for i in 0..4 {
            let h = Arc::clone(&h);
            handles.push(tokio::spawn(async move {
                h.pipeline
                    .upload(&format!("copy-{}.png", i), Some("image/png"), b"same scan")
                    .await
            }));
        }

        let mut created = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => created += 1,
                Err(Error::Duplicate { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(created, 1);
        assert_eq!(duplicates, 3);
        assert_eq!(h.registry().get_stats().await.unwrap().document_count, 1);
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let h = harness(FakeOcr::returning(&[]), vec![], FakeEmbedder::new(4)).await;
        assert!(matches!(
            h.pipeline.upload("a.pdf", None, b"").await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            h.pipeline.upload("notes.txt", Some("text/plain"), b"hello").await,
            Err(Error::Validation(_))
        ));
    }
}
