use crate::ingest::{IngestOutcome, Ingestor, MessageRing};
use crate::ports::{MessengerPort, SheetPort};
use crate::store::ArtifactStore;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{Path, Query},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use hyper::Server;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Everything the façade needs, shared across handlers.
pub struct AppState {
    pub store: Arc<ArtifactStore>,
    pub ring: Arc<MessageRing>,
    pub ingestor: Arc<Ingestor>,
    pub messenger: Arc<dyn MessengerPort>,
    pub sheets: Option<Arc<dyn SheetPort>>,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "status": "error", "message": message.into() })),
    )
        .into_response()
}

/// Liveness probe
async fn index() -> impl IntoResponse {
    "Server is running!"
}

/// Health check endpoint
async fn health(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "mediagate",
        "version": env!("CARGO_PKG_VERSION"),
        "listener": format!("{:?}", state.ingestor.state()).to_lowercase(),
    }))
}

async fn last_file(Extension(state): Extension<Arc<AppState>>) -> Response {
    match state.store.get_last() {
        Some(status) => Json(status).into_response(),
        None => error_body(StatusCode::NOT_FOUND, "no artifact has been downloaded yet"),
    }
}

async fn download_file(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.store.serve(&name) {
        Ok(Some((file_name, bytes))) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", file_name),
                ),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => error_body(StatusCode::NOT_FOUND, format!("file '{}' not found", name)),
        Err(e) => {
            error!("Failed to serve '{}': {}", name, e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to read file")
        }
    }
}

async fn delete_file(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Response {
    match state.store.delete_one(&name) {
        Ok(true) => Json(json!({ "status": "ok" })).into_response(),
        Ok(false) => error_body(StatusCode::NOT_FOUND, format!("file '{}' not found", name)),
        Err(e) => {
            error!("Failed to delete '{}': {}", name, e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete file")
        }
    }
}

async fn cleanup(Extension(state): Extension<Arc<AppState>>) -> Response {
    match state.store.evict_all() {
        Ok(deleted) => Json(json!({ "status": "ok", "files_deleted": deleted })).into_response(),
        Err(e) => {
            error!("Eviction failed: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "eviction failed")
        }
    }
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    chat: i64,
    message_id: i64,
    username: Option<String>,
    sheet_name: Option<String>,
}

/// Ad-hoc ingestion of one previously seen message, through the same gate and
/// size checks the listener applies.
async fn download(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Json<DownloadParams>, JsonRejection>,
) -> Response {
    // Malformed bodies get the same JSON envelope as every other failure.
    let Json(params) = match params {
        Ok(params) => params,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.to_string()),
    };

    let Some(event) = state.ring.find(params.chat, params.message_id) else {
        return error_body(
            StatusCode::NOT_FOUND,
            format!("message {} not seen in chat {}", params.message_id, params.chat),
        );
    };

    if let Some(username) = &params.username {
        let allowed = state
            .ingestor
            .gate()
            .is_allowed_in(username, params.sheet_name.as_deref())
            .await;
        if !allowed {
            return error_body(
                StatusCode::FORBIDDEN,
                format!("'{}' is not on the allow-list", username),
            );
        }
    }

    match state.ingestor.ingest_attachment(&event).await {
        Ok(IngestOutcome::Stored(record)) => {
            Json(json!({ "status": "ok", "artifact": record })).into_response()
        }
        Ok(IngestOutcome::NoAttachment) => {
            error_body(StatusCode::BAD_REQUEST, "message carries no attachment")
        }
        Ok(IngestOutcome::Oversized) => error_body(
            StatusCode::BAD_REQUEST,
            "attachment exceeds the configured maximum size",
        ),
        Err(e) => {
            error!("Ad-hoc download failed: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct LastMessagesQuery {
    chat: i64,
    limit: Option<usize>,
}

async fn last_messages(
    Extension(state): Extension<Arc<AppState>>,
    query: Result<Query<LastMessagesQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.to_string()),
    };
    let limit = query.limit.unwrap_or(10);
    Json(state.ring.recent(query.chat, limit)).into_response()
}

#[derive(Debug, Deserialize)]
struct UpdateWhitelistParams {
    chat_id: i64,
    sheet_name: String,
    worksheet_name: String,
}

/// Re-enumerates channel members and overwrites the allow-list worksheet.
async fn update_whitelist(
    Extension(state): Extension<Arc<AppState>>,
    params: Result<Json<UpdateWhitelistParams>, JsonRejection>,
) -> Response {
    let Json(params) = match params {
        Ok(params) => params,
        Err(rejection) => return error_body(StatusCode::BAD_REQUEST, rejection.to_string()),
    };

    let Some(sheets) = &state.sheets else {
        return error_body(StatusCode::BAD_REQUEST, "allow-list sheet is not configured");
    };

    let members = match state.messenger.chat_members(params.chat_id).await {
        Ok(members) => members,
        Err(e) => {
            error!("Member enumeration failed for chat {}: {}", params.chat_id, e);
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    let mut rows = Vec::with_capacity(members.len() + 1);
    rows.push("username".to_string()); // header row
    rows.extend(members);

    match sheets
        .overwrite_rows(&params.sheet_name, &params.worksheet_name, &rows)
        .await
    {
        Ok(()) => {
            info!(
                "Rewrote allow-list '{}' with {} member(s)",
                params.worksheet_name,
                rows.len() - 1
            );
            Json(json!({ "status": "ok", "members": rows.len() - 1 })).into_response()
        }
        Err(e) => {
            error!("Allow-list rewrite failed: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Create the HTTP server with all routes
pub fn create_server(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/last_file", get(last_file))
        // Wildcard captures let traversal attempts reach the sanitizer
        // instead of being rejected as unroutable.
        .route("/download_file/*name", get(download_file))
        .route("/delete_file/*name", post(delete_file))
        .route("/cleanup", post(cleanup))
        .route("/download", post(download))
        .route("/last_messages", get(last_messages))
        .route("/update_whitelist", post(update_whitelist))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_server(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📦 Last artifact: http://localhost:{port}/last_file");

    Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    Ok(())
}
