//! Bearer-token authentication middleware.
//!
//! Resolves `Authorization: Bearer <api-key>` to the owning application
//! and injects it as a request extension for downstream handlers.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use piperelay_core::Store;

use crate::{error::ApiError, AppState};

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(String::from)
}

/// Axum middleware authenticating requests against application API keys.
///
/// # Errors
///
/// Returns 401 when the header is missing or malformed, or the key is
/// unknown.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = bearer_token(req.headers()).ok_or_else(|| {
        ApiError::Unauthorized("missing or malformed authorization header".to_string())
    })?;

    let app = state
        .store
        .application_by_api_key(&api_key)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized("invalid api key".to_string()))?;

    req.extensions_mut().insert(app);

    Ok(next.run(req).await)
}
