//! Error types for the orchestrator core and the REST API.

use crate::models::BotStatus;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(test)]
mod tests;

/// Errors produced by the orchestrator and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// No free host port is left in the configured range.
    #[error("no free port in range {start}..{end}")]
    ResourceExhausted {
        /// First port of the range (inclusive).
        start: u16,
        /// Last port of the range (exclusive).
        end: u16,
    },

    /// Writing a config artifact or provisioning a data directory failed.
    #[error("failed to write artifact {path}: {source}")]
    ArtifactWrite {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The container backend could not be reached.
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// The worker image does not exist and could not be pulled.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The referenced bot has no live container.
    #[error("not found: {0}")]
    NotFound(String),

    /// The tenant has no registry record for the referenced bot.
    #[error("unknown bot: {0}")]
    UnknownBot(String),

    /// A lifecycle transition was attempted from an incompatible state.
    #[error("bot {bot_id} is {current}, cannot {attempted}")]
    ConflictingState {
        /// Bot identifier.
        bot_id: String,
        /// Status the bot is currently in.
        current: BotStatus,
        /// Operation that was refused.
        attempted: String,
    },

    /// A runtime call exceeded its deadline.
    #[error("{operation} timed out after {}s", after.as_secs())]
    Timeout {
        /// Name of the runtime operation.
        operation: &'static str,
        /// Deadline that elapsed.
        after: Duration,
    },

    /// The declarative bot configuration or an identifier failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The bot registry failed.
    #[error("registry error: {0}")]
    Registry(String),

    /// The container runtime rejected a request.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl OrchestratorError {
    /// Whether the error means "does not exist" rather than a communication failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::UnknownBot(_))
    }
}

impl From<sqlx::Error> for OrchestratorError {
    fn from(err: sqlx::Error) -> Self {
        OrchestratorError::Registry(err.to_string())
    }
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
}

/// Rate limit error response body.
#[derive(Debug, Serialize)]
pub struct RateLimitErrorResponse {
    /// Error message.
    pub error: String,
    /// Error code.
    pub code: String,
    /// Maximum requests allowed.
    pub limit: u32,
    /// Remaining requests.
    pub remaining: u32,
    /// Unix timestamp when the rate limit resets.
    pub reset: u64,
    /// Seconds until reset.
    pub retry_after: u64,
}

/// API error types.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Bot record not found for the tenant.
    #[error("Bot not found: {0}")]
    BotNotFound(String),

    /// Bot exists but has no live container.
    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    /// API key not found for the tenant.
    #[error("API key not found: {0}")]
    KeyNotFound(String),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Lifecycle conflict.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or invalid credentials.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credentials lack the required permission.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// No capacity left to provision.
    #[error("Capacity exhausted: {0}")]
    CapacityExhausted(String),

    /// Container backend unreachable.
    #[error("Runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Worker image missing.
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    /// Upstream call timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded")]
    RateLimitExceeded {
        /// Maximum requests allowed.
        limit: u32,
        /// Remaining requests (always 0 when exceeded).
        remaining: u32,
        /// Unix timestamp when the rate limit resets.
        reset: u64,
        /// Seconds until reset.
        retry_after: u64,
    },
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BotNotFound(_) => (StatusCode::NOT_FOUND, "BOT_NOT_FOUND"),
            ApiError::ContainerNotFound(_) => (StatusCode::NOT_FOUND, "CONTAINER_NOT_FOUND"),
            ApiError::KeyNotFound(_) => (StatusCode::NOT_FOUND, "KEY_NOT_FOUND"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICTING_STATE"),
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            ApiError::CapacityExhausted(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RESOURCE_EXHAUSTED")
            }
            ApiError::RuntimeUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "RUNTIME_UNAVAILABLE")
            }
            ApiError::ImageNotFound(_) => (StatusCode::BAD_GATEWAY, "IMAGE_NOT_FOUND"),
            ApiError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            ApiError::RateLimitExceeded { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::RateLimitExceeded {
            limit,
            remaining,
            reset,
            retry_after,
        } = self
        {
            let body = Json(RateLimitErrorResponse {
                error: "Rate limit exceeded".to_string(),
                code: "RATE_LIMIT_EXCEEDED".to_string(),
                limit,
                remaining,
                reset,
                retry_after,
            });

            return (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    ("X-RateLimit-Limit", limit.to_string()),
                    ("X-RateLimit-Remaining", remaining.to_string()),
                    ("X-RateLimit-Reset", reset.to_string()),
                    ("Retry-After", retry_after.to_string()),
                ],
                body,
            )
                .into_response();
        }

        let (status, code) = self.status_and_code();
        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NotFound(what) => ApiError::ContainerNotFound(what),
            OrchestratorError::UnknownBot(bot_id) => ApiError::BotNotFound(bot_id),
            OrchestratorError::ConflictingState { .. } => ApiError::Conflict(err.to_string()),
            OrchestratorError::InvalidConfig(msg) => ApiError::InvalidRequest(msg),
            OrchestratorError::ResourceExhausted { .. } => {
                ApiError::CapacityExhausted(err.to_string())
            }
            OrchestratorError::RuntimeUnavailable(msg) => ApiError::RuntimeUnavailable(msg),
            OrchestratorError::ImageNotFound(image) => ApiError::ImageNotFound(image),
            OrchestratorError::Timeout { .. } => ApiError::Timeout(err.to_string()),
            OrchestratorError::Registry(msg) => ApiError::Database(msg),
            OrchestratorError::ArtifactWrite { .. } | OrchestratorError::Runtime(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}
