//! Security middleware for the stroller-service API.
//!
//! This module provides middleware for:
//! - API token authentication
//! - Device identifier validation

use std::sync::Arc;

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::config::SecurityConfig;

/// Body returned with every authentication failure.
const AUTH_FAILED: &str = "Authentication failed. Invalid or missing API token.";

/// API token authentication middleware.
///
/// Checks the `X-API-Token` header against the configured token. For
/// WebSocket connections (which cannot set custom headers from browsers),
/// also accepts a `token` query parameter.
///
/// Returns 403 Forbidden if the token is missing or invalid. When no token
/// is configured, every request passes.
pub async fn api_token_auth(
    headers: HeaderMap,
    State(config): State<Arc<SecurityConfig>>,
    request: Request,
    next: Next,
) -> Response {
    // No token configured means auth is disabled
    let Some(expected) = &config.api_token else {
        return next.run(request).await;
    };

    // Skip auth for health endpoint (monitoring should work without auth)
    if request.uri().path() == "/api/health" {
        return next.run(request).await;
    }

    // Get the token from the header first
    let mut provided = headers.get("X-API-Token").and_then(|v| v.to_str().ok());

    // For WebSocket connections, also check query parameter
    // (browsers cannot set custom headers during WebSocket upgrade)
    if provided.is_none()
        && let Some(query) = request.uri().query()
    {
        provided = query.split('&').find_map(|param| {
            let mut parts = param.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some("token"), Some(value)) => Some(value),
                _ => None,
            }
        });
    }

    let valid = match provided {
        // Constant-time comparison to prevent timing attacks
        Some(provided) => constant_time_eq(expected.as_bytes(), provided.as_bytes()),
        None => false,
    };

    if valid {
        next.run(request).await
    } else {
        warn!(
            "API token authentication failed for {}",
            request.uri().path()
        );
        (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": AUTH_FAILED })),
        )
            .into_response()
    }
}

/// Constant-time byte comparison.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Validate a device identifier.
///
/// Identifiers end up as MQTT topic segments, so wildcards and separators
/// are rejected outright rather than rewritten.
///
/// # Examples
///
/// ```
/// use stroller_service::middleware::validate_device_id;
///
/// assert!(validate_device_id("stroller-042").is_ok());
/// assert!(validate_device_id("ab").is_err());
/// assert!(validate_device_id("nested/topic").is_err());
/// ```
pub fn validate_device_id(id: &str) -> Result<(), &'static str> {
    if id.len() < 3 {
        return Err("Device ID must be at least 3 characters");
    }

    if id.len() > 64 {
        return Err("Device ID must be at most 64 characters");
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
    {
        return Err("Device ID may only contain alphanumerics, '-', '_' and ':'");
    }

    Ok(())
}
