//! Document, tag and field management endpoints

use crate::error::{Error, Result};
use crate::meta::{
    Document, DocumentField, DocumentStatus, DocumentTag, FieldType, Source, Stage, Tag,
};
use crate::server::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_LIST_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

/// A document with its tags and fields
#[derive(Debug, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub document: Document,
    pub tags: Vec<DocumentTag>,
    pub fields: Vec<DocumentField>,
}

#[derive(Debug, Deserialize)]
pub struct ReprocessRequest {
    pub from: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    pub name: String,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRequest {
    pub value: Option<String>,
    pub field_type: Option<String>,
}

/// GET /api/documents?status=&limit=
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Document>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<DocumentStatus>)
        .transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    Ok(Json(state.registry().list_documents(status, limit).await?))
}

/// GET /api/documents/:id
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetail>> {
    let registry = state.registry();
    let document = registry.require_document(&id).await?;
    let tags = registry.document_tags(&id).await?;
    let fields = registry.document_fields(&id).await?;
    Ok(Json(DocumentDetail {
        document,
        tags,
        fields,
    }))
}

/// DELETE /api/documents/:id
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    let doc = state.pipeline().delete_document(&id).await?;
    Ok(Json(json!({ "deleted": doc.id })))
}

/// POST /api/documents/:id/reprocess `{"from": "ocr" | "extract" | "embed"}`
pub async fn reprocess_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ReprocessRequest>>,
) -> Result<(StatusCode, Json<Value>)> {
    let stage = match body.and_then(|Json(b)| b.from) {
        Some(from) => from.parse::<Stage>()?,
        None => Stage::Ocr,
    };
    state.pipeline().reprocess(&id, stage).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "id": id, "from": stage.to_string() })),
    ))
}

/// POST /api/documents/:id/tags `{"name", "color"?}`
pub async fn add_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<TagRequest>,
) -> Result<Json<Vec<DocumentTag>>> {
    let registry = state.registry();
    registry.require_document(&id).await?;
    let tag = registry
        .find_or_create_tag(&request.name, request.color.as_deref())
        .await?;
    registry.link_tag(&id, &tag.id, Source::Manual, None).await?;
    Ok(Json(registry.document_tags(&id).await?))
}

/// DELETE /api/documents/:id/tags/:tag_id
pub async fn remove_tag(
    State(state): State<AppState>,
    Path((id, tag_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.registry().unlink_tag(&id, &tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/documents/:id/fields/:name `{"value", "fieldType"?}`
pub async fn set_field(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    Json(request): Json<FieldRequest>,
) -> Result<Json<Vec<DocumentField>>> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("Field name must not be empty".to_string()));
    }
    let field_type = request
        .field_type
        .as_deref()
        .map(FieldType::from_schema_type)
        .unwrap_or(FieldType::Text);

    let registry = state.registry();
    registry
        .set_manual_field(&id, name, request.value.as_deref(), field_type)
        .await?;
    Ok(Json(registry.document_fields(&id).await?))
}

/// DELETE /api/documents/:id/fields/:name
pub async fn delete_field(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.registry().delete_field(&id, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/tags
pub async fn list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>> {
    Ok(Json(state.registry().list_tags().await?))
}

/// POST /api/tags `{"name", "color"?}`
pub async fn create_tag(
    State(state): State<AppState>,
    Json(request): Json<TagRequest>,
) -> Result<(StatusCode, Json<Tag>)> {
    let tag = state
        .registry()
        .find_or_create_tag(&request.name, request.color.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(tag)))
}

/// DELETE /api/tags/:id
pub async fn delete_tag(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    state.registry().delete_tag(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
