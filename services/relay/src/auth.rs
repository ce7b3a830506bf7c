//! API-key gate for the upload routes.

use crate::api::{ApiError, AppState};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Let the request through only if the configured header carries the API key.
pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let presented = request
        .headers()
        .get(&*state.api_key_header)
        .map(|value| value.as_bytes());

    if presented == Some(state.api_key.as_bytes()) {
        next.run(request).await
    } else {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "Rejected request without a valid API key"
        );
        ApiError::Unauthorized.into_response()
    }
}
