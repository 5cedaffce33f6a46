//! Stage trigger endpoints
//!
//! Each takes `{documentId}`, runs one stage and answers with its outcome.
//! The next stage is dispatched before the response goes out. With
//! `Prefer: respond-async` the job is accepted with 202 instead and the
//! stage runs detached from the request.

use crate::meta::Stage;
use crate::pipeline::{spawn_job, Job, RESPOND_ASYNC};
use crate::server::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StageRequest {
    document_id: Option<String>,
}

/// `documentId` from a body that may be missing or malformed
fn document_id(body: &Bytes) -> Option<String> {
    serde_json::from_slice::<StageRequest>(body)
        .ok()
        .and_then(|r| r.document_id)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn wants_async(headers: &HeaderMap) -> bool {
    headers
        .get_all("prefer")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim().eq_ignore_ascii_case(RESPOND_ASYNC))
}

async fn run(state: AppState, stage: Stage, headers: HeaderMap, body: Bytes) -> Response {
    let Some(id) = document_id(&body) else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "documentId is required" })),
        )
            .into_response();
    };

    if wants_async(&headers) {
        if let Err(e) = state.registry().require_document(&id).await {
            return e.into_response();
        }
        spawn_job(
            Arc::clone(state.pipeline()),
            Job {
                stage,
                document_id: id.clone(),
            },
        );
        return (
            StatusCode::ACCEPTED,
            Json(json!({ "documentId": id, "stage": stage.to_string(), "status": "accepted" })),
        )
            .into_response();
    }

    match state.pipeline().run_stage(stage, &id).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /api/process-ocr
pub async fn process_ocr(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    run(state, Stage::Ocr, headers, body).await
}

/// POST /api/extract-data
pub async fn extract_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    run(state, Stage::Extract, headers, body).await
}

/// POST /api/generate-embed
pub async fn generate_embed(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    run(state, Stage::Embed, headers, body).await
}
