use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

use crate::coordinator::api::ApiState;
use crate::protocol::{ErrorResponse, API_KEY_HEADER};

/// Shared-secret gate for the protocol surface. `/health` is mounted
/// outside this layer and stays open.
pub async fn require_api_key(
    State(state): State<ApiState>,
    req: Request,
    next: Next,
) -> Response {
    let expected = &state.registry.config().api_key;
    if expected.is_empty() {
        return next.run(req).await;
    }

    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(key) if key == expected => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "missing or invalid api key".to_string(),
            }),
        )
            .into_response(),
    }
}
