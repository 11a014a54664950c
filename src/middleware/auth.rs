//! Gateway access-token middleware
//!
//! Validates the caller's bearer token against the configured access
//! token list. An empty list leaves the gateway open.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::handlers::AppState;
use crate::utils::logging::mask_credential;

/// Access-token check applied to every /v1 route
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request<Body>,
    next: Next,
) -> Result<Response<Body>, StatusCode> {
    let path = request.uri().path();

    // Health endpoints stay open
    if path.starts_with("/health") || path == "/" {
        return Ok(next.run(request).await);
    }

    if state.settings.security.access_tokens.is_empty() {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(strip_bearer)
        // The Anthropic surface sends x-api-key instead
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|value| value.to_str().ok())
        });

    match token {
        Some(token) if state.settings.security.access_tokens.iter().any(|t| t == token) => {
            debug!("Authenticated request to {}", path);
            Ok(next.run(request).await)
        }
        Some(token) => {
            warn!("Rejected token {} for {}", mask_credential(token), path);
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!("Missing credentials for {}", path);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Strip an optional `Bearer ` prefix
fn strip_bearer(value: &str) -> &str {
    value.strip_prefix("Bearer ").unwrap_or(value)
}
