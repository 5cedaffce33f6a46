//! Extraction schema endpoints

use crate::error::Result;
use crate::meta::{DocumentSchema, NewSchema};
use crate::server::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

/// GET /api/schemas
pub async fn list_schemas(State(state): State<AppState>) -> Result<Json<Vec<DocumentSchema>>> {
    Ok(Json(state.registry().list_schemas().await?))
}

/// POST /api/schemas - create, or replace the schema of the same document type
pub async fn upsert_schema(
    State(state): State<AppState>,
    Json(input): Json<NewSchema>,
) -> Result<Json<DocumentSchema>> {
    Ok(Json(state.registry().upsert_schema(&input).await?))
}

/// DELETE /api/schemas/:document_type
pub async fn delete_schema(
    State(state): State<AppState>,
    Path(document_type): Path<String>,
) -> Result<StatusCode> {
    state.registry().delete_schema(&document_type).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use crate::ocr::tests::FakeOcr;
    use crate::server::tests::spawn_server;
    use reqwest::StatusCode;
    use serde_json::{json, Value};

    fn invoice_schema() -> Value {
        json!({
            "name": "Rechnung",
            "document_type": "invoice",
            "description": "Rechnungen von Lieferanten",
            "field_schema": {
                "properties": {
                    "betrag": { "type": "currency", "description": "Gesamtbetrag" },
                    "datum": { "type": "date" }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_schema_upsert_list_delete() {
        let server = spawn_server(FakeOcr::returning(&[]), vec![]).await;

        let created: Value = server
            .client
            .post(server.url("/api/schemas"))
            .json(&invoice_schema())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(created["document_type"], "invoice");

        let mut renamed = invoice_schema();
        renamed["name"] = json!("Eingangsrechnung");
        let replaced: Value = server
            .client
            .post(server.url("/api/schemas"))
            .json(&renamed)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(replaced["id"], created["id"]);
        assert_eq!(replaced["name"], "Eingangsrechnung");

        let listed: Value = server
            .client
            .get(server.url("/api/schemas"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let deleted = server
            .client
            .delete(server.url("/api/schemas/invoice"))
            .send()
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
        let missing = server
            .client
            .delete(server.url("/api/schemas/invoice"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_schema_without_properties_is_rejected() {
        let server = spawn_server(FakeOcr::returning(&[]), vec![]).await;
        let response = server
            .client
            .post(server.url("/api/schemas"))
            .json(&json!({
                "name": "Kaputt",
                "document_type": "broken",
                "field_schema": { "fields": [] }
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
