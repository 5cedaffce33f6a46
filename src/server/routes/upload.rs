//! Document upload endpoint

use crate::error::{Error, Result};
use crate::pipeline::UploadOutcome;
use crate::server::state::AppState;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

/// POST /api/upload - store a file and start its pipeline
///
/// Takes the first multipart part that carries a filename.
pub async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadOutcome>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("Invalid multipart body: {}", e)))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::Validation(format!("Failed to read file: {}", e)))?;

        info!("Received {} ({} bytes)", filename, data.len());
        let outcome = state
            .pipeline()
            .upload(&filename, content_type.as_deref(), &data)
            .await?;
        return Ok((StatusCode::CREATED, Json(outcome)));
    }

    Err(Error::Validation("No file provided".to_string()))
}
