//! API routes

pub mod documents;
pub mod query;
pub mod schemas;
pub mod stages;
pub mod upload;

use crate::error::Result;
use crate::meta::RegistryStats;
use crate::server::state::AppState;
use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};

pub fn api_routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(upload::upload_document).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        // Stage triggers
        .route("/process-ocr", post(stages::process_ocr))
        .route("/extract-data", post(stages::extract_data))
        .route("/generate-embed", post(stages::generate_embed))
        // Retrieval
        .route("/search", post(query::search))
        .route("/chat", post(query::chat))
        // Documents
        .route("/documents", get(documents::list_documents))
        .route(
            "/documents/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route("/documents/:id/reprocess", post(documents::reprocess_document))
        .route("/documents/:id/tags", post(documents::add_tag))
        .route("/documents/:id/tags/:tag_id", delete(documents::remove_tag))
        .route(
            "/documents/:id/fields/:name",
            put(documents::set_field).delete(documents::delete_field),
        )
        // Tags
        .route("/tags", get(documents::list_tags).post(documents::create_tag))
        .route("/tags/:id", delete(documents::delete_tag))
        // Schemas
        .route("/schemas", get(schemas::list_schemas).post(schemas::upsert_schema))
        .route("/schemas/:document_type", delete(schemas::delete_schema))
        .route("/stats", get(stats))
}

/// GET /api/stats
async fn stats(State(state): State<AppState>) -> Result<Json<RegistryStats>> {
    Ok(Json(state.registry().get_stats().await?))
}
