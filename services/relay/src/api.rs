use crate::auth::require_api_key;
use crate::config::{ApiConfig, Config};
use crate::relay::{StorageRelay, UploadResult};
use crate::upload::{self, UploadError, UploadLimits};
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Multipart framing allowance on top of the raw file bytes
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<StorageRelay>,
    pub limits: UploadLimits,
    pub api_key: Arc<str>,
    pub api_key_header: Arc<str>,
}

impl AppState {
    pub fn new(relay: Arc<StorageRelay>, config: &Config) -> Self {
        Self {
            relay,
            limits: UploadLimits::from(&config.upload),
            api_key: Arc::from(config.api.api_key.as_str()),
            api_key_header: Arc::from(config.api.api_key_header.as_str()),
        }
    }
}

/// Errors surfaced to HTTP clients as `{"error": ...}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error("{0}")]
    Storage(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            // An empty batch fails the whole request, not just one file
            ApiError::Upload(UploadError::NoFiles) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upload(UploadError::PayloadTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Single-file upload response
#[derive(Debug, Serialize)]
pub struct SingleUploadResponse {
    pub success: bool,
    pub file: StoredFileResponse,
}

/// Stored file in a single-file response
#[derive(Debug, Serialize)]
pub struct StoredFileResponse {
    pub key: String,
    pub url: String,
    pub name: String,
    pub size: usize,
}

/// Multi-file upload response
#[derive(Debug, Serialize)]
pub struct MultiUploadResponse {
    /// True only if every file was stored
    pub success: bool,
    pub uploaded: usize,
    pub failed: usize,
    pub files: Vec<FileOutcome>,
}

/// Per-file outcome, in submission order
#[derive(Debug, Serialize)]
pub struct FileOutcome {
    pub name: String,
    #[serde(flatten)]
    pub result: UploadResult,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &Config) -> Router {
    let single_limit = config.upload.max_file_size_bytes + MULTIPART_OVERHEAD_BYTES;
    let multi_limit = config
        .upload
        .max_files
        .saturating_mul(config.upload.max_file_size_bytes)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let uploads = Router::new()
        .route(
            "/upload",
            post(upload_single).layer(DefaultBodyLimit::max(single_limit)),
        )
        .route(
            "/upload-multiple",
            post(upload_multiple).layer(DefaultBodyLimit::max(multi_limit)),
        );

    // Gate the whole /api prefix, unmatched paths included
    let api = Router::new()
        .nest("/s3", uploads)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(config.api.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.api))
        .with_state(state)
}

fn cors_layer(config: &ApiConfig) -> CorsLayer {
    if !config.cors_enabled {
        return CorsLayer::new();
    }

    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Upload a single file from the `file` field
#[instrument(skip_all)]
async fn upload_single(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SingleUploadResponse>, ApiError> {
    // A body that is not multipart carries no file
    let multipart = multipart.map_err(|e| {
        warn!(error = %e, "Upload request is not multipart");
        UploadError::NoFile
    })?;

    let upload = upload::parse_single(multipart, &state.limits).await?;
    let file = upload.file;

    let result = state.relay.upload_file(&file, &upload.folder).await;
    match (result.key, result.url) {
        (Some(key), Some(url)) if result.success => Ok(Json(SingleUploadResponse {
            success: true,
            file: StoredFileResponse {
                key,
                url,
                name: file.original_name,
                size: file.size,
            },
        })),
        _ => Err(ApiError::Storage(
            result
                .error
                .unwrap_or_else(|| "Upload failed".to_string()),
        )),
    }
}

/// Upload up to `max_files` files from the `files` field
#[instrument(skip_all)]
async fn upload_multiple(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<MultiUploadResponse>, ApiError> {
    let multipart = multipart.map_err(|e| {
        warn!(error = %e, "Upload request is not multipart");
        UploadError::NoFiles
    })?;

    let upload = upload::parse_multiple(multipart, &state.limits).await?;
    let results = state.relay.upload_files(&upload.files, &upload.folder).await;

    if results.len() != upload.files.len() {
        return Err(ApiError::Internal(format!(
            "Expected {} upload results, got {}",
            upload.files.len(),
            results.len()
        )));
    }

    let uploaded = results.iter().filter(|r| r.success).count();
    let failed = results.len() - uploaded;

    info!(uploaded, failed, folder = %upload.folder, "Batch upload finished");

    let files = upload
        .files
        .into_iter()
        .zip(results)
        .map(|(file, result)| FileOutcome {
            name: file.original_name,
            result,
        })
        .collect();

    Ok(Json(MultiUploadResponse {
        success: failed == 0,
        uploaded,
        failed,
        files,
    }))
}

/// Start the relay API server and serve until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = config.listen_addr();

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    info!(
        address = %addr,
        "Server ready at http://localhost:{}/",
        config.api.port
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Upload(UploadError::NoFile).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Upload(UploadError::NoFiles).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Upload(UploadError::PayloadTooLarge).status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::Storage("down".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(ApiError::Unauthorized.to_string(), "Unauthorized");
        assert_eq!(
            ApiError::Upload(UploadError::NoFile).to_string(),
            "No file provided"
        );
    }

    #[test]
    fn test_file_outcome_flattens_result() {
        let outcome = FileOutcome {
            name: "a.png".to_string(),
            result: UploadResult::failed("denied"),
        };
        assert_eq!(
            serde_json::to_value(outcome).unwrap(),
            serde_json::json!({ "name": "a.png", "success": false, "error": "denied" })
        );
    }
}
