//! Classification and field extraction over OCR text
//!
//! Completion replies are untyped JSON. Everything that comes back is checked
//! against the shape we expect before it reaches the registry: the document
//! type must be a string, tags a list of strings, fields a flat map of
//! scalar values.

mod prompts;

pub use prompts::*;

use crate::config::CompletionConfig;
use crate::error::Result;
use crate::llm::{complete_json, CompletionClient};
use crate::meta::{DocumentSchema, FieldType, FieldValue};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Most tags kept from one classification
pub const MAX_TAGS: usize = 5;

/// Confidence attached to free-form fields
pub const FREEFORM_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub document_type: String,
    pub title: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Clone)]
pub struct Classifier {
    client: Arc<dyn CompletionClient>,
    config: CompletionConfig,
}

impl Classifier {
    pub fn new(client: Arc<dyn CompletionClient>, config: CompletionConfig) -> Self {
        Self { client, config }
    }

    pub async fn classify(
        &self,
        ocr_text: &str,
        schemas: &[DocumentSchema],
    ) -> Result<Classification> {
        let messages = classification_messages(ocr_text, schemas, self.config.classify_max_chars);
        let reply = complete_json(self.client.as_ref(), messages).await?;
        let classification = parse_classification(&reply);
        debug!(
            "Classified as {} with {} tags",
            classification.document_type,
            classification.tags.len()
        );
        Ok(classification)
    }

    /// Extract fields guided by `schema`, or free-form when there is none
    pub async fn extract_fields(
        &self,
        ocr_text: &str,
        schema: Option<&DocumentSchema>,
    ) -> Result<Vec<FieldValue>> {
        match schema {
            Some(schema) => {
                let declared = schema.fields()?;
                let messages = schema_extraction_messages(
                    ocr_text,
                    schema,
                    &declared,
                    self.config.extract_max_chars,
                );
                let reply = complete_json(self.client.as_ref(), messages).await?;
                Ok(parse_schema_fields(&reply, &declared))
            }
            None => {
                let messages = freeform_extraction_messages(
                    ocr_text,
                    self.config.max_fallback_fields,
                    self.config.extract_max_chars,
                );
                let reply = complete_json(self.client.as_ref(), messages).await?;
                Ok(parse_freeform_fields(&reply, self.config.max_fallback_fields))
            }
        }
    }
}

/// Validate a classification reply; malformed parts degrade instead of failing
pub fn parse_classification(reply: &Value) -> Classification {
    let document_type = reply
        .get("document_type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(OTHER_TYPE)
        .to_string();

    let title = reply
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let mut tags = Vec::new();
    let mut seen = HashSet::new();
    match reply.get("tags") {
        Some(Value::Array(items)) => {
            for item in items {
                let Some(tag) = item.as_str().map(str::trim) else {
                    warn!("Ignoring non-string tag {}", item);
                    continue;
                };
                if tag.is_empty() || !seen.insert(tag.to_lowercase()) {
                    continue;
                }
                tags.push(tag.to_string());
                if tags.len() == MAX_TAGS {
                    break;
                }
            }
        }
        Some(Value::Null) | None => {}
        Some(other) => warn!("Ignoring tags that are not a list: {}", other),
    }

    Classification {
        document_type,
        title,
        tags,
    }
}

/// Stringify a scalar JSON value; nulls and nested values yield None
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn reply_object(reply: &Value) -> Option<&Map<String, Value>> {
    let object = reply.as_object();
    if object.is_none() {
        warn!("Field extraction reply is not an object");
    }
    object
}

/// Keep only declared, non-null fields, typed by their schema declaration
pub fn parse_schema_fields(reply: &Value, declared: &[crate::meta::SchemaField]) -> Vec<FieldValue> {
    let Some(object) = reply_object(reply) else {
        return Vec::new();
    };

    declared
        .iter()
        .filter_map(|field| {
            let value = scalar_to_string(object.get(&field.name)?)?;
            Some(FieldValue {
                name: field.name.clone(),
                value,
                field_type: FieldType::from_schema_type(&field.field_type),
                confidence: None,
            })
        })
        .collect()
}

/// Normalize arbitrary keys to snake_case and cap the field count
pub fn parse_freeform_fields(reply: &Value, max_fields: usize) -> Vec<FieldValue> {
    let Some(object) = reply_object(reply) else {
        return Vec::new();
    };

    let mut fields = Vec::new();
    let mut seen = HashSet::new();
    for (key, raw) in object {
        if fields.len() == max_fields {
            break;
        }
        let name = to_snake_case(key);
        if name.is_empty() || seen.contains(&name) {
            continue;
        }
        let Some(value) = scalar_to_string(raw) else {
            continue;
        };
        let field_type = if raw.is_number() {
            FieldType::Number
        } else if raw.is_boolean() {
            FieldType::Boolean
        } else {
            FieldType::Text
        };
        seen.insert(name.clone());
        fields.push(FieldValue {
            name,
            value,
            field_type,
            confidence: Some(FREEFORM_CONFIDENCE),
        });
    }
    fields
}

/// `Rechnungs Datum` / `rechnungsDatum` / `Größe` -> `rechnungs_datum`, `groesse`
pub fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut prev_lower = false;
    for c in key.trim().chars() {
        let expanded = match c {
            'ä' | 'Ä' => Some("ae"),
            'ö' | 'Ö' => Some("oe"),
            'ü' | 'Ü' => Some("ue"),
            'ß' => Some("ss"),
            _ => None,
        };
        if let Some(s) = expanded {
            if c.is_uppercase() && prev_lower {
                out.push('_');
            }
            out.push_str(s);
            prev_lower = true;
        } else if c.is_ascii_alphanumeric() {
            if c.is_ascii_uppercase() && prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        } else {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    out.trim_matches('_').to_string()
}
