//! HTTP server: upload, stage triggers, search, chat and document management

pub mod routes;
pub mod state;

use crate::config::Config;
use crate::error::{Error, Result};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub use state::AppState;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Duplicate { .. } => StatusCode::CONFLICT,
            Error::DocumentNotFound(_) | Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = json!({ "error": self.to_string() });
        if let Error::Duplicate { existing_id } = &self {
            body["existingId"] = json!(existing_id);
        }
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        (status, Json(body)).into_response()
    }
}

/// Router with every route and middleware layer
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let max_upload = state.config().server.max_upload_bytes;

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", routes::api_routes(max_upload))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Bind and serve until the process is stopped
pub async fn serve(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| Error::Config(format!("Invalid listen address: {}", e)))?;

    let state = AppState::from_config(config).await?;
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health_check() -> &'static str {
    "OK"
}
