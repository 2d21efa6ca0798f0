//! API middleware for authentication and rate limiting.

use crate::auth::grants;
use crate::error::ApiError;
use crate::models::Permission;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Header name for API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Rate limit window in seconds.
const RATE_WINDOW_SECS: u64 = 60;

/// Paths served without credentials.
const PUBLIC_PATHS: [&str; 3] = ["/health", "/swagger-ui", "/api-docs"];

/// Caller identity attached to every authenticated request.
#[derive(Debug, Clone)]
pub struct TenantContext {
    /// Tenant the request acts for.
    pub tenant_id: String,
    /// Key used to authenticate.
    pub key_id: String,
    /// Permissions granted to the key.
    pub permissions: Vec<Permission>,
}

impl TenantContext {
    /// Fails with `Forbidden` unless the key grants `permission`.
    ///
    /// # Errors
    /// `ApiError::Forbidden`.
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if grants(&self.permissions, permission) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "API key lacks '{}' permission",
                permission_name(permission)
            )))
        }
    }
}

fn permission_name(permission: Permission) -> &'static str {
    match permission {
        Permission::Read => "read",
        Permission::Manage => "manage",
        Permission::Admin => "admin",
    }
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    api_key: Option<String>,
}

fn is_public(path: &str) -> bool {
    PUBLIC_PATHS
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{}/", prefix)))
}

/// Extracts the API key from the header, or from the `api_key` query
/// parameter for clients (such as browsers opening a WebSocket) that cannot
/// set headers.
fn extract_api_key(request: &Request<Body>) -> Option<String> {
    if let Some(key) = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return Some(key.to_string());
    }

    Query::<KeyQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.api_key)
}

/// Authentication and rate limiting middleware.
///
/// Resolves the API key to a [`TenantContext`] and stores it as a request
/// extension. Returns 401 without a valid key and 429 when the key's rate
/// limit is exceeded. Adds rate limit headers to all authenticated responses.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_public(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(raw_key) = extract_api_key(&request) else {
        return ApiError::Unauthorized("missing API key".to_string()).into_response();
    };
    let Some(stored_key) = state.api_key_store.validate_key(&raw_key) else {
        debug!(path = %request.uri().path(), "Rejected invalid API key");
        return ApiError::Unauthorized("invalid API key".to_string()).into_response();
    };

    let rate_limit = stored_key.rate_limit;
    let reset = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + RATE_WINDOW_SECS;

    if !state
        .api_key_store
        .check_rate_limit(&stored_key.key_id, rate_limit)
    {
        return ApiError::RateLimitExceeded {
            limit: rate_limit,
            remaining: 0,
            reset,
            retry_after: RATE_WINDOW_SECS,
        }
        .into_response();
    }
    let remaining = state
        .api_key_store
        .remaining_requests(&stored_key.key_id, rate_limit);

    request.extensions_mut().insert(TenantContext {
        tenant_id: stored_key.tenant_id.clone(),
        key_id: stored_key.key_id.clone(),
        permissions: stored_key.permissions.clone(),
    });

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert("X-RateLimit-Limit", HeaderValue::from(rate_limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset));

    response
}
