use super::Pipeline;
use crate::error::Result;
use crate::meta::{Document, Source, Stage};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractOutcome {
    pub status: &'static str,
    pub document_type: String,
    pub title: String,
    pub tags: Vec<String>,
    pub fields: BTreeMap<String, String>,
}

impl Pipeline {
    /// ocr_done -> extracted: classify, extract fields, link tags
    pub async fn run_extract(&self, document_id: &str) -> Result<ExtractOutcome> {
        let doc = self.registry.require_document(document_id).await?;
        Self::require_status(&doc, Stage::Extract)?;

        match self.classify_and_extract(&doc).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => self.fail(document_id, e).await,
        }
    }

    async fn classify_and_extract(&self, doc: &Document) -> Result<ExtractOutcome> {
        let ocr_text = Self::require_ocr_text(doc)?;
        let schemas = self.registry.list_schemas().await?;

        let classification = self.classifier.classify(ocr_text, &schemas).await?;
        let schema = schemas
            .iter()
            .find(|s| s.document_type == classification.document_type);

        // Title and type are worth keeping even when field extraction fails
        let fields = match self.classifier.extract_fields(ocr_text, schema).await {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Field extraction failed for {}: {}", doc.id, e);
                Vec::new()
            }
        };

        let title = classification
            .title
            .clone()
            .unwrap_or_else(|| doc.original_filename.clone());
        self.registry
            .complete_extraction(
                &doc.id,
                &title,
                &classification.document_type,
                schema.map(|s| s.id.as_str()),
            )
            .await?;

        let mut tags = Vec::with_capacity(classification.tags.len());
        for name in &classification.tags {
            match self.link_ai_tag(&doc.id, name).await {
                Ok(()) => tags.push(name.clone()),
                Err(e) => warn!("Could not tag {} with {:?}: {}", doc.id, name, e),
            }
        }

        let mut stored = BTreeMap::new();
        for field in fields {
            match self.registry.upsert_field(&doc.id, &field).await {
                Ok(()) => {
                    stored.insert(field.name, field.value);
                }
                Err(e) => warn!("Could not store field {:?} of {}: {}", field.name, doc.id, e),
            }
        }

        info!(
            "Extracted {} as {} ({} tags, {} fields)",
            doc.id,
            classification.document_type,
            tags.len(),
            stored.len()
        );

        Ok(ExtractOutcome {
            status: "extracted",
            document_type: classification.document_type,
            title,
            tags,
            fields: stored,
        })
    }

    async fn link_ai_tag(&self, document_id: &str, name: &str) -> Result<()> {
        let tag = self.registry.find_or_create_tag(name, None).await?;
        self.registry
            .link_tag(document_id, &tag.id, Source::Ai, None)
            .await
    }
}
