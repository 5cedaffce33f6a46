//! Document registry using SQLite
//!
//! This module owns all relational state:
//! - Documents and their status state machine
//! - Tags and document/tag links
//! - Extracted fields
//! - Extraction schemas
//! - Chunk embeddings
//!
//! Every status transition is a single guarded `UPDATE ... WHERE status IN (..)`
//! so a transition is either fully applied or rejected.

mod catalog;
mod schema;

pub use catalog::*;
pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Pipeline status of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    OcrDone,
    Extracted,
    Ready,
    Error,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 6] = [
        DocumentStatus::Uploaded,
        DocumentStatus::Processing,
        DocumentStatus::OcrDone,
        DocumentStatus::Extracted,
        DocumentStatus::Ready,
        DocumentStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::OcrDone => "ocr_done",
            DocumentStatus::Extracted => "extracted",
            DocumentStatus::Ready => "ready",
            DocumentStatus::Error => "error",
        }
    }

    /// Statuses a document may be in immediately before entering `self`
    pub fn predecessors(&self) -> &'static [DocumentStatus] {
        use DocumentStatus::*;
        match self {
            Uploaded => &[],
            // OCR may be retried from an errored run
            Processing => &[Uploaded, Error],
            OcrDone => &[Processing],
            Extracted => &[OcrDone],
            Ready => &[Extracted],
            Error => &[Uploaded, Processing, OcrDone, Extracted],
        }
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        next.predecessors().contains(self)
    }

    /// `ready` and `error` end a pipeline run
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::Error)
    }

    fn sql_list(statuses: &[DocumentStatus]) -> String {
        statuses
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "ocr_done" => Ok(DocumentStatus::OcrDone),
            "extracted" => Ok(DocumentStatus::Extracted),
            "ready" => Ok(DocumentStatus::Ready),
            "error" => Ok(DocumentStatus::Error),
            _ => Err(Error::Validation(format!("Unknown document status: {}", s))),
        }
    }
}

/// A registered document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub sha256: String,
    pub storage_path: String,
    pub original_filename: String,
    pub mime_type: String,
    pub file_size: i64,
    pub status: String,
    pub ocr_text: Option<String>,
    pub page_count: Option<i64>,
    pub title: Option<String>,
    pub document_type: Option<String>,
    pub schema_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Document {
    pub fn new(
        sha256: String,
        storage_path: String,
        original_filename: String,
        mime_type: String,
        file_size: i64,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            sha256,
            storage_path,
            original_filename,
            mime_type,
            file_size,
            status: DocumentStatus::Uploaded.to_string(),
            ocr_text: None,
            page_count: None,
            title: None,
            document_type: None,
            schema_id: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn get_status(&self) -> Result<DocumentStatus> {
        self.status.parse()
    }

    /// Title if classified, otherwise the uploaded filename
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.original_filename)
    }
}

/// One stored chunk embedding
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmbeddingRow {
    pub document_id: String,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: String,
    pub created_at: String,
}

impl EmbeddingRow {
    pub fn vector(&self) -> Result<Vec<f32>> {
        Ok(serde_json::from_str(&self.embedding)?)
    }
}

/// Pipeline stage a document can be re-run from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Ocr,
    Extract,
    Embed,
}

impl Stage {
    /// Status a document must hold for this stage to start
    pub fn input_status(&self) -> DocumentStatus {
        match self {
            Stage::Ocr => DocumentStatus::Uploaded,
            Stage::Extract => DocumentStatus::OcrDone,
            Stage::Embed => DocumentStatus::Extracted,
        }
    }

    /// Stage that runs after this one finishes
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Ocr => Some(Stage::Extract),
            Stage::Extract => Some(Stage::Embed),
            Stage::Embed => None,
        }
    }

    /// Path segment of the stage trigger endpoint
    pub fn endpoint(&self) -> &'static str {
        match self {
            Stage::Ocr => "process-ocr",
            Stage::Extract => "extract-data",
            Stage::Embed => "generate-embed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Ocr => write!(f, "ocr"),
            Stage::Extract => write!(f, "extract"),
            Stage::Embed => write!(f, "embed"),
        }
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ocr" => Ok(Stage::Ocr),
            "extract" | "classify" => Ok(Stage::Extract),
            "embed" => Ok(Stage::Embed),
            _ => Err(Error::Validation(format!("Unknown stage: {}", s))),
        }
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    pub document_count: usize,
    pub by_status: BTreeMap<String, usize>,
    pub tag_count: usize,
    pub field_count: usize,
    pub schema_count: usize,
    pub embedding_count: usize,
}

/// Document registry handle
#[derive(Clone)]
pub struct Registry {
    pool: SqlitePool,
    fts_tokenizer: String,
}

impl Registry {
    /// Connect to the registry database named by the config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file, &config.search.fts_tokenizer).await
    }

    /// Open a registry at a path without a full config
    pub async fn open(db_path: &Path, fts_tokenizer: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            fts_tokenizer: fts_tokenizer.to_string(),
        })
    }

    /// Initialize the database schema, including the full-text index
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        sqlx::query(&fts_schema_sql(&self.fts_tokenizer))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='documents'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Underlying pool, for read-only query modules such as search
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Document Operations =====

    /// Insert a freshly uploaded document.
    ///
    /// The UNIQUE constraint on `sha256` decides concurrent uploads of the same
    /// content; the loser gets `Error::Duplicate` with the winner's id.
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO documents (id, sha256, storage_path, original_filename, mime_type,
                                   file_size, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.sha256)
        .bind(&doc.storage_path)
        .bind(&doc.original_filename)
        .bind(&doc.mime_type)
        .bind(doc.file_size)
        .bind(&doc.status)
        .bind(&doc.created_at)
        .bind(&doc.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let err = Error::from(e);
                if err.is_unique_violation() {
                    if let Some(existing) = self.find_by_sha256(&doc.sha256).await? {
                        return Err(Error::Duplicate {
                            existing_id: existing.id,
                        });
                    }
                }
                Err(err)
            }
        }
    }

    /// Get a document by id
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// Get a document by id, failing with `DocumentNotFound`
    pub async fn require_document(&self, id: &str) -> Result<Document> {
        self.get_document(id)
            .await?
            .ok_or_else(|| Error::DocumentNotFound(id.to_string()))
    }

    /// Find the document holding this content digest
    pub async fn find_by_sha256(&self, sha256: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE sha256 = ?")
            .bind(sha256)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// List documents, newest first
    pub async fn list_documents(
        &self,
        status: Option<DocumentStatus>,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let docs = match status {
            Some(status) => {
                sqlx::query_as::<_, Document>(
                    "SELECT * FROM documents WHERE status = ? ORDER BY created_at DESC, doc_no DESC LIMIT ?",
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Document>(
                    "SELECT * FROM documents ORDER BY created_at DESC, doc_no DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(docs)
    }

    /// Delete a document; tags links, fields and embeddings cascade.
    ///
    /// Returns the deleted row so the caller can remove its blob.
    pub async fn delete_document(&self, id: &str) -> Result<Document> {
        let doc = self.require_document(id).await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        info!("Deleted document {}", id);
        Ok(doc)
    }

    // ===== State Machine =====

    /// Turn a zero-row guarded update into the right error
    async fn rejected_transition(&self, id: &str, to: DocumentStatus) -> Error {
        match self.get_document(id).await {
            Ok(Some(doc)) => Error::InvalidTransition {
                from: doc.status,
                to: to.to_string(),
            },
            Ok(None) => Error::Conflict(format!("Document {} does not exist", id)),
            Err(e) => e,
        }
    }

    /// uploaded | error -> processing
    pub async fn begin_processing(&self, id: &str) -> Result<()> {
        let to = DocumentStatus::Processing;
        let sql = format!(
            "UPDATE documents SET status = ?, error_message = NULL, updated_at = ? \
             WHERE id = ? AND status IN ({})",
            DocumentStatus::sql_list(to.predecessors())
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, to).await);
        }
        debug!("Document {} -> {}", id, to);
        Ok(())
    }

    /// processing -> ocr_done, writing the OCR output in the same statement
    pub async fn complete_ocr(&self, id: &str, ocr_text: &str, page_count: i64) -> Result<()> {
        let to = DocumentStatus::OcrDone;
        let sql = format!(
            "UPDATE documents SET status = ?, ocr_text = ?, page_count = ?, error_message = NULL, \
             updated_at = ? WHERE id = ? AND status IN ({})",
            DocumentStatus::sql_list(to.predecessors())
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(ocr_text)
            .bind(page_count)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, to).await);
        }
        debug!("Document {} -> {}", id, to);
        Ok(())
    }

    /// ocr_done -> extracted, writing classification output in the same statement
    pub async fn complete_extraction(
        &self,
        id: &str,
        title: &str,
        document_type: &str,
        schema_id: Option<&str>,
    ) -> Result<()> {
        let to = DocumentStatus::Extracted;
        let sql = format!(
            "UPDATE documents SET status = ?, title = ?, document_type = ?, schema_id = ?, \
             error_message = NULL, updated_at = ? WHERE id = ? AND status IN ({})",
            DocumentStatus::sql_list(to.predecessors())
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(title)
            .bind(document_type)
            .bind(schema_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(self.rejected_transition(id, to).await);
        }
        debug!("Document {} -> {}", id, to);
        Ok(())
    }

    /// extracted -> ready: replace all embeddings and flip status in one transaction
    pub async fn complete_embedding(&self, id: &str, chunks: &[(String, Vec<f32>)]) -> Result<()> {
        let to = DocumentStatus::Ready;
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE documents SET status = ?, error_message = NULL, updated_at = ? \
             WHERE id = ? AND status IN ({})",
            DocumentStatus::sql_list(to.predecessors())
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(self.rejected_transition(id, to).await);
        }

        sqlx::query("DELETE FROM document_embeddings WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for (index, (text, vector)) in chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO document_embeddings (document_id, chunk_index, chunk_text, embedding, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(index as i64)
            .bind(text)
            .bind(serde_json::to_string(vector)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Document {} -> {} with {} chunks", id, to, chunks.len());
        Ok(())
    }

    /// Record a failed run. Returns false when the document is already
    /// terminal (ready, or holding an earlier error) and was left untouched.
    pub async fn record_failure(&self, id: &str, message: &str) -> Result<bool> {
        let to = DocumentStatus::Error;
        let sql = format!(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? \
             WHERE id = ? AND status IN ({})",
            DocumentStatus::sql_list(to.predecessors())
        );
        let result = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(message)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            if self.get_document(id).await?.is_none() {
                return Err(Error::Conflict(format!("Document {} does not exist", id)));
            }
            return Ok(false);
        }
        info!("Document {} -> error: {}", id, message);
        Ok(true)
    }

    /// Move a document back to the input status of `stage`.
    ///
    /// Embeddings are dropped with the reset so only `ready` documents have any.
    pub async fn reset_for_stage(&self, id: &str, stage: Stage) -> Result<()> {
        let doc = self.require_document(id).await?;
        let current = doc.get_status()?;
        if current == DocumentStatus::Processing {
            return Err(Error::Conflict(format!(
                "Document {} is currently being processed",
                id
            )));
        }
        if stage != Stage::Ocr && doc.ocr_text.is_none() {
            return Err(Error::Conflict(format!(
                "Document {} has no OCR text; reprocess from ocr",
                id
            )));
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM document_embeddings WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE documents SET status = ?, error_message = NULL, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(stage.input_status().as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(current.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        info!("Document {} reset to {} for {} stage", id, stage.input_status(), stage);
        Ok(())
    }

    // ===== Embedding Operations =====

    /// Embeddings of a document in chunk order
    pub async fn list_embeddings(&self, document_id: &str) -> Result<Vec<EmbeddingRow>> {
        let rows = sqlx::query_as::<_, EmbeddingRow>(
            "SELECT * FROM document_embeddings WHERE document_id = ? ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_embeddings(&self, document_id: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_embeddings WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as usize)
    }

    // ===== Statistics =====

    pub async fn get_stats(&self) -> Result<RegistryStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM documents GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut by_status: BTreeMap<String, usize> = DocumentStatus::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        let mut document_count = 0;
        for (status, count) in rows {
            document_count += count as usize;
            by_status.insert(status, count as usize);
        }

        let tag_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tags")
            .fetch_one(&self.pool)
            .await?;
        let field_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_fields")
            .fetch_one(&self.pool)
            .await?;
        let schema_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_schemas")
            .fetch_one(&self.pool)
            .await?;
        let embedding_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_embeddings")
            .fetch_one(&self.pool)
            .await?;

        Ok(RegistryStats {
            document_count,
            by_status,
            tag_count: tag_count as usize,
            field_count: field_count as usize,
            schema_count: schema_count as usize,
            embedding_count: embedding_count as usize,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn setup_test_db() -> (Registry, TempDir) {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.paths.db_file = tmp.path().join("test.db");

        let db = Registry::connect(&config).await.unwrap();
        db.init_schema().await.unwrap();
        (db, tmp)
    }

    pub(crate) fn sample_document(content: &str) -> Document {
        let sha = crate::digest::digest(content.as_bytes());
        let path = crate::digest::storage_path(&sha, "scan.pdf");
        Document::new(
            sha,
            path,
            "scan.pdf".to_string(),
            "application/pdf".to_string(),
            content.len() as i64,
        )
    }

    #[test]
    fn test_transition_table() {
        use DocumentStatus::*;
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Processing.can_transition_to(OcrDone));
        assert!(OcrDone.can_transition_to(Extracted));
        assert!(Extracted.can_transition_to(Ready));
        assert!(Error.can_transition_to(Processing));

        assert!(!Ready.can_transition_to(Error));
        assert!(!Extracted.can_transition_to(OcrDone));
        assert!(!Uploaded.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Processing));
        for status in [Uploaded, Processing, OcrDone, Extracted] {
            assert!(status.can_transition_to(Error));
        }
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in DocumentStatus::ALL {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("finished".parse::<DocumentStatus>().is_err());
    }

    #[tokio::test]
    async fn test_insert_and_duplicate() {
        let (db, _tmp) = setup_test_db().await;

        let doc = sample_document("hello");
        db.insert_document(&doc).await.unwrap();

        let loaded = db.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, "uploaded");
        assert!(loaded.ocr_text.is_none());

        // Same content under a new id loses on the UNIQUE constraint
        let twin = sample_document("hello");
        match db.insert_document(&twin).await {
            Err(Error::Duplicate { existing_id }) => assert_eq!(existing_id, doc.id),
            other => panic!("expected duplicate, got {:?}", other),
        }

        let all = db.list_documents(None, 100).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_happy_path_transitions() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("happy");
        db.insert_document(&doc).await.unwrap();

        db.begin_processing(&doc.id).await.unwrap();
        db.complete_ocr(&doc.id, "Rechnung Nr. 42", 1).await.unwrap();
        db.complete_extraction(&doc.id, "Rechnung 42", "invoice", None)
            .await
            .unwrap();
        db.complete_embedding(&doc.id, &[("Rechnung Nr. 42".to_string(), vec![0.1, 0.2])])
            .await
            .unwrap();

        let loaded = db.require_document(&doc.id).await.unwrap();
        assert_eq!(loaded.get_status().unwrap(), DocumentStatus::Ready);
        assert_eq!(loaded.page_count, Some(1));
        assert_eq!(loaded.title.as_deref(), Some("Rechnung 42"));

        let rows = db.list_embeddings(&doc.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vector().unwrap(), vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn test_backward_and_skipping_transitions_rejected() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("strict");
        db.insert_document(&doc).await.unwrap();

        // Cannot skip processing
        let err = db.complete_ocr(&doc.id, "text", 1).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        db.begin_processing(&doc.id).await.unwrap();
        db.complete_ocr(&doc.id, "text", 1).await.unwrap();

        // Cannot go back to processing from ocr_done
        let err = db.begin_processing(&doc.id).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let err = db.complete_embedding(&doc.id, &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(db.count_embeddings(&doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_document_is_conflict() {
        let (db, _tmp) = setup_test_db().await;
        let err = db.begin_processing("missing").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        let err = db.record_failure("missing", "boom").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_record_failure_rules() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("fails");
        db.insert_document(&doc).await.unwrap();
        db.begin_processing(&doc.id).await.unwrap();

        assert!(db.record_failure(&doc.id, "OCR failed (500)").await.unwrap());
        // First error wins
        assert!(!db.record_failure(&doc.id, "Pipeline trigger failed").await.unwrap());

        let loaded = db.require_document(&doc.id).await.unwrap();
        assert_eq!(loaded.get_status().unwrap(), DocumentStatus::Error);
        assert_eq!(loaded.error_message.as_deref(), Some("OCR failed (500)"));

        // Retrying OCR clears the message
        db.begin_processing(&doc.id).await.unwrap();
        let loaded = db.require_document(&doc.id).await.unwrap();
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_ready_documents_do_not_take_errors() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("done");
        db.insert_document(&doc).await.unwrap();
        db.begin_processing(&doc.id).await.unwrap();
        db.complete_ocr(&doc.id, "t", 1).await.unwrap();
        db.complete_extraction(&doc.id, "t", "other", None).await.unwrap();
        db.complete_embedding(&doc.id, &[("t".to_string(), vec![1.0])])
            .await
            .unwrap();

        assert!(!db.record_failure(&doc.id, "late").await.unwrap());
        let loaded = db.require_document(&doc.id).await.unwrap();
        assert_eq!(loaded.status, "ready");
        assert!(loaded.error_message.is_none());
    }

    #[tokio::test]
    async fn test_reset_for_stage_drops_embeddings() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("again");
        db.insert_document(&doc).await.unwrap();
        db.begin_processing(&doc.id).await.unwrap();
        db.complete_ocr(&doc.id, "text", 1).await.unwrap();
        db.complete_extraction(&doc.id, "t", "other", None).await.unwrap();
        db.complete_embedding(&doc.id, &[("text".to_string(), vec![1.0])])
            .await
            .unwrap();

        db.reset_for_stage(&doc.id, Stage::Embed).await.unwrap();
        let loaded = db.require_document(&doc.id).await.unwrap();
        assert_eq!(loaded.get_status().unwrap(), DocumentStatus::Extracted);
        assert_eq!(db.count_embeddings(&doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (db, _tmp) = setup_test_db().await;
        db.insert_document(&sample_document("a")).await.unwrap();
        db.insert_document(&sample_document("b")).await.unwrap();

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.by_status.get("uploaded"), Some(&2));
        assert_eq!(stats.by_status.get("ready"), Some(&0));
    }
}
