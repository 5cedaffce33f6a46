//! Search and chat endpoints

use crate::chat::{ChatRequest, ChatResponse};
use crate::error::Result;
use crate::search::{SearchRequest, SearchResponse};
use crate::server::state::AppState;
use axum::extract::State;
use axum::Json;

/// POST /api/search
pub async fn search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    Ok(Json(state.search().search_request(&request).await?))
}

/// POST /api/chat
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    Ok(Json(state.chat().chat(&request).await?))
}
