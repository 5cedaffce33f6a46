//! Tags, extracted fields and extraction schemas

use super::Registry;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

/// Who wrote a tag link or field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Ai,
    Manual,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ai => "ai",
            Source::Manual => "manual",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored type of a field value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Currency,
    Date,
    Boolean,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Currency => "currency",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
        }
    }

    /// Map a schema's declared type name; anything unrecognised is text
    pub fn from_schema_type(declared: &str) -> Self {
        match declared.trim().to_lowercase().as_str() {
            "number" | "integer" | "float" | "decimal" => FieldType::Number,
            "currency" | "money" | "amount" => FieldType::Currency,
            "date" | "datetime" => FieldType::Date,
            "boolean" | "bool" => FieldType::Boolean,
            _ => FieldType::Text,
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
    pub created_at: String,
}

/// A tag as attached to one document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocumentTag {
    pub tag_id: String,
    pub name: String,
    pub color: Option<String>,
    pub source: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocumentField {
    pub id: String,
    pub document_id: String,
    pub field_name: String,
    pub field_value: Option<String>,
    pub field_type: String,
    pub source: String,
    pub confidence: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

/// A field value about to be written
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub name: String,
    pub value: String,
    pub field_type: FieldType,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DocumentSchema {
    pub id: String,
    pub name: String,
    pub document_type: String,
    pub description: Option<String>,
    /// `{"properties": {name: {"type", "description"}}}`
    pub field_schema: String,
    pub created_at: String,
    pub updated_at: String,
}

/// One declared field of a schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub description: Option<String>,
}

impl DocumentSchema {
    /// Declared fields in name order
    pub fn fields(&self) -> Result<Vec<SchemaField>> {
        parse_field_schema(&self.field_schema)
    }

    pub fn field_schema_json(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.field_schema)?)
    }
}

/// Parse and validate a field schema document
pub fn parse_field_schema(raw: &str) -> Result<Vec<SchemaField>> {
    let value: Value = serde_json::from_str(raw)?;
    let properties = value
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Validation("Field schema needs a \"properties\" object".to_string()))?;

    let ordered: BTreeMap<_, _> = properties.iter().collect();
    let mut fields = Vec::with_capacity(ordered.len());
    for (name, declared) in ordered {
        let field_type = declared
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("text")
            .to_string();
        let description = declared
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        fields.push(SchemaField {
            name: name.clone(),
            field_type,
            description,
        });
    }
    Ok(fields)
}

/// Input for creating or replacing a schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchema {
    pub name: String,
    pub document_type: String,
    pub description: Option<String>,
    pub field_schema: Value,
}

impl Registry {
    // ===== Tag Operations =====

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        let tags = sqlx::query_as::<_, Tag>("SELECT * FROM tags ORDER BY name COLLATE NOCASE")
            .fetch_all(self.pool())
            .await?;
        Ok(tags)
    }

    pub async fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        let tag = sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE name = ? COLLATE NOCASE")
            .bind(name.trim())
            .fetch_optional(self.pool())
            .await?;
        Ok(tag)
    }

    /// Find a tag ignoring case, creating it if absent.
    ///
    /// A concurrent creator winning the UNIQUE constraint is resolved by
    /// re-reading the winner's row.
    pub async fn find_or_create_tag(&self, name: &str, color: Option<&str>) -> Result<Tag> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::Validation("Tag name must not be empty".to_string()));
        }

        if let Some(existing) = self.find_tag(name).await? {
            return Ok(existing);
        }

        let tag = Tag {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            color: color.map(str::to_string),
            created_at: Utc::now().to_rfc3339(),
        };

        let result = sqlx::query("INSERT INTO tags (id, name, color, created_at) VALUES (?, ?, ?, ?)")
            .bind(&tag.id)
            .bind(&tag.name)
            .bind(&tag.color)
            .bind(&tag.created_at)
            .execute(self.pool())
            .await;

        match result {
            Ok(_) => Ok(tag),
            Err(e) => {
                let err = Error::from(e);
                if err.is_unique_violation() {
                    if let Some(existing) = self.find_tag(name).await? {
                        return Ok(existing);
                    }
                }
                Err(err)
            }
        }
    }

    pub async fn delete_tag(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Tag {}", id)));
        }
        Ok(())
    }

    /// Attach a tag, replacing source/confidence of an existing link
    pub async fn link_tag(
        &self,
        document_id: &str,
        tag_id: &str,
        source: Source,
        confidence: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_tags (document_id, tag_id, source, confidence, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(document_id, tag_id) DO UPDATE SET
                source = excluded.source,
                confidence = excluded.confidence
            "#,
        )
        .bind(document_id)
        .bind(tag_id)
        .bind(source.as_str())
        .bind(confidence)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        debug!("Linked tag {} to document {} ({})", tag_id, document_id, source);
        Ok(())
    }

    pub async fn unlink_tag(&self, document_id: &str, tag_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM document_tags WHERE document_id = ? AND tag_id = ?")
            .bind(document_id)
            .bind(tag_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn document_tags(&self, document_id: &str) -> Result<Vec<DocumentTag>> {
        let tags = sqlx::query_as::<_, DocumentTag>(
            r#"
            SELECT t.id AS tag_id, t.name, t.color, dt.source, dt.confidence
            FROM document_tags dt
            JOIN tags t ON t.id = dt.tag_id
            WHERE dt.document_id = ?
            ORDER BY t.name COLLATE NOCASE
            "#,
        )
        .bind(document_id)
        .fetch_all(self.pool())
        .await?;
        Ok(tags)
    }

    // ===== Field Operations =====

    /// Write an AI-extracted field; re-extraction overwrites by name
    pub async fn upsert_field(&self, document_id: &str, field: &FieldValue) -> Result<()> {
        self.write_field(
            document_id,
            &field.name,
            Some(&field.value),
            field.field_type,
            Source::Ai,
            field.confidence,
        )
        .await
    }

    /// User override: source becomes manual and confidence is cleared
    pub async fn set_manual_field(
        &self,
        document_id: &str,
        field_name: &str,
        value: Option<&str>,
        field_type: FieldType,
    ) -> Result<()> {
        self.require_document(document_id).await?;
        self.write_field(document_id, field_name, value, field_type, Source::Manual, None)
            .await
    }

    async fn write_field(
        &self,
        document_id: &str,
        field_name: &str,
        value: Option<&str>,
        field_type: FieldType,
        source: Source,
        confidence: Option<f64>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO document_fields (id, document_id, field_name, field_value, field_type,
                                         source, confidence, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id, field_name) DO UPDATE SET
                field_value = excluded.field_value,
                field_type = excluded.field_type,
                source = excluded.source,
                confidence = excluded.confidence,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(document_id)
        .bind(field_name)
        .bind(value)
        .bind(field_type.as_str())
        .bind(source.as_str())
        .bind(confidence)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn delete_field(&self, document_id: &str, field_name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM document_fields WHERE document_id = ? AND field_name = ?")
            .bind(document_id)
            .bind(field_name)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "Field {} on document {}",
                field_name, document_id
            )));
        }
        Ok(())
    }

    pub async fn document_fields(&self, document_id: &str) -> Result<Vec<DocumentField>> {
        let fields = sqlx::query_as::<_, DocumentField>(
            "SELECT * FROM document_fields WHERE document_id = ? ORDER BY field_name",
        )
        .bind(document_id)
        .fetch_all(self.pool())
        .await?;
        Ok(fields)
    }

    // ===== Schema Operations =====

    pub async fn list_schemas(&self) -> Result<Vec<DocumentSchema>> {
        let schemas =
            sqlx::query_as::<_, DocumentSchema>("SELECT * FROM document_schemas ORDER BY document_type")
                .fetch_all(self.pool())
                .await?;
        Ok(schemas)
    }

    pub async fn get_schema_by_type(&self, document_type: &str) -> Result<Option<DocumentSchema>> {
        let schema = sqlx::query_as::<_, DocumentSchema>(
            "SELECT * FROM document_schemas WHERE document_type = ?",
        )
        .bind(document_type)
        .fetch_optional(self.pool())
        .await?;
        Ok(schema)
    }

    /// Create a schema or replace the one with the same document type
    pub async fn upsert_schema(&self, input: &NewSchema) -> Result<DocumentSchema> {
        let document_type = input.document_type.trim();
        if document_type.is_empty() {
            return Err(Error::Validation(
                "Schema document_type must not be empty".to_string(),
            ));
        }
        if document_type == "other" {
            return Err(Error::Validation(
                "\"other\" is reserved for unmatched documents".to_string(),
            ));
        }

        let field_schema = serde_json::to_string(&input.field_schema)?;
        parse_field_schema(&field_schema)?;

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO document_schemas (id, name, document_type, description, field_schema,
                                          created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_type) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                field_schema = excluded.field_schema,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&input.name)
        .bind(document_type)
        .bind(&input.description)
        .bind(&field_schema)
        .bind(&now)
        .bind(&now)
        .execute(self.pool())
        .await?;

        self.get_schema_by_type(document_type)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Schema {}", document_type)))
    }

    pub async fn delete_schema(&self, document_type: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM document_schemas WHERE document_type = ?")
            .bind(document_type)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Schema {}", document_type)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::{sample_document, setup_test_db};
    use serde_json::json;

    fn invoice_schema() -> NewSchema {
        NewSchema {
            name: "Rechnung".to_string(),
            document_type: "invoice".to_string(),
            description: Some("Invoices from suppliers".to_string()),
            field_schema: json!({
                "properties": {
                    "total_amount": {"type": "currency", "description": "Gross total"},
                    "invoice_number": {"type": "string", "description": "Invoice id"}
                }
            }),
        }
    }

    #[tokio::test]
    async fn test_tags_case_insensitive() {
        let (db, _tmp) = setup_test_db().await;

        let a = db.find_or_create_tag("Steuern", None).await.unwrap();
        let b = db.find_or_create_tag("steuern", Some("#ff0000")).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(db.list_tags().await.unwrap().len(), 1);

        assert!(db.find_or_create_tag("   ", None).await.is_err());
    }

    #[tokio::test]
    async fn test_link_tag_upserts() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("tagged");
        db.insert_document(&doc).await.unwrap();
        let tag = db.find_or_create_tag("Versicherung", None).await.unwrap();

        db.link_tag(&doc.id, &tag.id, Source::Ai, Some(0.8)).await.unwrap();
        db.link_tag(&doc.id, &tag.id, Source::Manual, None).await.unwrap();

        let tags = db.document_tags(&doc.id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].source, "manual");
        assert!(tags[0].confidence.is_none());

        db.unlink_tag(&doc.id, &tag.id).await.unwrap();
        assert!(db.document_tags(&doc.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_manual_field_overrides_ai() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("fields");
        db.insert_document(&doc).await.unwrap();

        let ai = FieldValue {
            name: "total_amount".to_string(),
            value: "119.00".to_string(),
            field_type: FieldType::Currency,
            confidence: Some(0.5),
        };
        db.upsert_field(&doc.id, &ai).await.unwrap();
        db.upsert_field(&doc.id, &ai).await.unwrap();
        assert_eq!(db.document_fields(&doc.id).await.unwrap().len(), 1);

        db.set_manual_field(&doc.id, "total_amount", Some("120.00"), FieldType::Currency)
            .await
            .unwrap();
        let fields = db.document_fields(&doc.id).await.unwrap();
        assert_eq!(fields[0].field_value.as_deref(), Some("120.00"));
        assert_eq!(fields[0].source, "manual");
        assert!(fields[0].confidence.is_none());

        db.delete_field(&doc.id, "total_amount").await.unwrap();
        assert!(matches!(
            db.delete_field(&doc.id, "total_amount").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_schema_upsert_and_fields() {
        let (db, _tmp) = setup_test_db().await;

        let created = db.upsert_schema(&invoice_schema()).await.unwrap();
        let fields = created.fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "invoice_number");
        assert_eq!(fields[1].field_type, "currency");

        let mut replacement = invoice_schema();
        replacement.name = "Invoice".to_string();
        let replaced = db.upsert_schema(&replacement).await.unwrap();
        assert_eq!(replaced.id, created.id);
        assert_eq!(replaced.name, "Invoice");
        assert_eq!(db.list_schemas().await.unwrap().len(), 1);

        let mut bad = invoice_schema();
        bad.field_schema = json!({"fields": []});
        assert!(matches!(db.upsert_schema(&bad).await, Err(Error::Validation(_))));

        db.delete_schema("invoice").await.unwrap();
        assert!(db.get_schema_by_type("invoice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let (db, _tmp) = setup_test_db().await;
        let doc = sample_document("cascade");
        db.insert_document(&doc).await.unwrap();
        db.begin_processing(&doc.id).await.unwrap();
        db.complete_ocr(&doc.id, "Kontoauszug", 1).await.unwrap();
        db.complete_extraction(&doc.id, "Kontoauszug", "other", None)
            .await
            .unwrap();
        db.complete_embedding(&doc.id, &[("Kontoauszug".to_string(), vec![0.5])])
            .await
            .unwrap();

        let tag = db.find_or_create_tag("Bank", None).await.unwrap();
        db.link_tag(&doc.id, &tag.id, Source::Ai, None).await.unwrap();
        db.upsert_field(
            &doc.id,
            &FieldValue {
                name: "iban".to_string(),
                value: "DE00".to_string(),
                field_type: FieldType::Text,
                confidence: None,
            },
        )
        .await
        .unwrap();

        db.delete_document(&doc.id).await.unwrap();

        assert!(db.document_tags(&doc.id).await.unwrap().is_empty());
        assert!(db.document_fields(&doc.id).await.unwrap().is_empty());
        assert!(db.list_embeddings(&doc.id).await.unwrap().is_empty());
        // The tag itself survives
        assert_eq!(db.list_tags().await.unwrap().len(), 1);
    }

    #[test]
    fn test_field_type_mapping() {
        assert_eq!(FieldType::from_schema_type("Integer"), FieldType::Number);
        assert_eq!(FieldType::from_schema_type("money"), FieldType::Currency);
        assert_eq!(FieldType::from_schema_type("string"), FieldType::Text);
    }
}
