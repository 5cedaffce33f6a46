//! Extraction schema commands

use super::open_registry;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::{DocumentSchema, NewSchema};
use std::path::Path;

pub async fn cmd_list_schemas(config: &Config) -> Result<Vec<DocumentSchema>> {
    open_registry(config).await?.list_schemas().await
}

/// Add or replace a schema given as inline JSON or a path to a JSON file
pub async fn cmd_add_schema(config: &Config, source: &str) -> Result<DocumentSchema> {
    let raw = if Path::new(source).is_file() {
        tokio::fs::read_to_string(source).await?
    } else {
        source.to_string()
    };
    let input: NewSchema = serde_json::from_str(&raw)
        .map_err(|e| Error::Validation(format!("Invalid schema JSON: {}", e)))?;
    open_registry(config).await?.upsert_schema(&input).await
}

pub async fn cmd_remove_schema(config: &Config, document_type: &str) -> Result<()> {
    open_registry(config).await?.delete_schema(document_type).await
}

pub fn print_schemas(schemas: &[DocumentSchema]) {
    println!("\n🗂  Extraction Schemas\n");
    if schemas.is_empty() {
        println!("No schemas defined. Documents are classified as \"other\".");
        return;
    }

    for schema in schemas {
        println!("• {} [{}]", schema.name, schema.document_type);
        if let Some(description) = &schema.description {
            println!("  {}", description);
        }
        match schema.fields() {
            Ok(fields) => {
                for field in fields {
                    println!(
                        "  - {} ({}){}",
                        field.name,
                        field.field_type,
                        field
                            .description
                            .map(|d| format!(": {}", d))
                            .unwrap_or_default()
                    );
                }
            }
            Err(e) => println!("  (unreadable field schema: {})", e),
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::cmd_init;
    use tempfile::TempDir;

    const LEASE: &str = r#"{
        "name": "Mietvertrag",
        "document_type": "lease",
        "field_schema": {"properties": {"miete": {"type": "currency"}}}
    }"#;

    #[tokio::test]
    async fn test_add_inline_and_from_file() {
        let tmp = TempDir::new().unwrap();
        let config = cmd_init(Some(tmp.path().join("home")), false).await.unwrap();

        let schema = cmd_add_schema(&config, LEASE).await.unwrap();
        assert_eq!(schema.document_type, "lease");

        let file = tmp.path().join("lease.json");
        std::fs::write(&file, LEASE.replace("Mietvertrag", "Wohnungsmiete")).unwrap();
        let replaced = cmd_add_schema(&config, file.to_str().unwrap()).await.unwrap();
        assert_eq!(replaced.name, "Wohnungsmiete");

        let schemas = cmd_list_schemas(&config).await.unwrap();
        assert_eq!(schemas.len(), 1);

        cmd_remove_schema(&config, "lease").await.unwrap();
        assert!(cmd_list_schemas(&config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_validation_error() {
        let tmp = TempDir::new().unwrap();
        let config = cmd_init(Some(tmp.path().to_path_buf()), false).await.unwrap();
        let err = cmd_add_schema(&config, "{not json").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
