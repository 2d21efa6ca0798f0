//! API request handlers.

use crate::api::middleware::TenantContext;
use crate::auth::DEFAULT_RATE_LIMIT;
use crate::error::ApiError;
use crate::models::{
    ApiKeysListResponse, BotConfig, BotLogsResponse, BotResponse, BotStatusResponse,
    BotsListResponse, CreateApiKeyRequest, CreateApiKeyResponse, DeleteBotResponse,
    HealthResponse, ListBotsQuery, LogsQuery, Permission,
};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use std::sync::Arc;
use tracing::info;

/// Default page size for bot listings.
const DEFAULT_PAGE_SIZE: usize = 100;

/// Largest accepted page size.
const MAX_PAGE_SIZE: usize = 1000;

// ============================================================================
// Health Check
// ============================================================================

/// Health check endpoint.
///
/// Reports `degraded` when the container runtime cannot be reached.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "Health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let status = match state.orchestrator.ping_runtime().await {
        Ok(()) => "healthy",
        Err(_) => "degraded",
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        runtime: state.orchestrator.runtime_name().to_string(),
    })
}

// ============================================================================
// Bots
// ============================================================================

/// Provision a bot for the calling tenant.
#[utoipa::path(
    post,
    path = "/api/v1/bots",
    request_body = BotConfig,
    responses(
        (status = 201, description = "Bot provisioned and running", body = BotResponse),
        (status = 400, description = "Invalid bot configuration"),
        (status = 409, description = "Bot already active"),
        (status = 503, description = "No port available or runtime unavailable")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn create_bot(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Json(config): Json<BotConfig>,
) -> Result<(StatusCode, Json<BotResponse>), ApiError> {
    tenant.require(Permission::Manage)?;

    let bot = state
        .orchestrator
        .provision(&tenant.tenant_id, config)
        .await?;

    Ok((StatusCode::CREATED, Json(bot.into())))
}

/// List the calling tenant's bots.
#[utoipa::path(
    get,
    path = "/api/v1/bots",
    params(ListBotsQuery),
    responses(
        (status = 200, description = "Bots of the tenant", body = BotsListResponse)
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn list_bots(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Query(query): Query<ListBotsQuery>,
) -> Result<Json<BotsListResponse>, ApiError> {
    tenant.require(Permission::Read)?;

    let skip = query.skip.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let bots = state
        .orchestrator
        .list_bots(&tenant.tenant_id, skip, limit)
        .await?;

    Ok(Json(BotsListResponse {
        bots: bots.into_iter().map(BotResponse::from).collect(),
    }))
}

/// Get a bot's registry record.
#[utoipa::path(
    get,
    path = "/api/v1/bots/{bot_id}",
    params(
        ("bot_id" = String, Path, description = "Bot identifier")
    ),
    responses(
        (status = 200, description = "Bot record", body = BotResponse),
        (status = 404, description = "Bot not found")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn get_bot(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
) -> Result<Json<BotResponse>, ApiError> {
    tenant.require(Permission::Read)?;

    let bot = state
        .orchestrator
        .get_bot(&tenant.tenant_id, &bot_id)
        .await?;

    Ok(Json(bot.into()))
}

/// Deprovision a bot. Deleting an unknown bot succeeds with `removed=false`.
#[utoipa::path(
    delete,
    path = "/api/v1/bots/{bot_id}",
    params(
        ("bot_id" = String, Path, description = "Bot identifier")
    ),
    responses(
        (status = 200, description = "Bot removed or already absent", body = DeleteBotResponse),
        (status = 409, description = "Bot is mid-transition")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn delete_bot(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
) -> Result<Json<DeleteBotResponse>, ApiError> {
    tenant.require(Permission::Manage)?;

    let removed = state
        .orchestrator
        .deprovision(&tenant.tenant_id, &bot_id)
        .await?;

    let message = if removed {
        format!("Bot {} deprovisioned", bot_id)
    } else {
        format!("Bot {} does not exist", bot_id)
    };

    Ok(Json(DeleteBotResponse {
        bot_id,
        removed,
        message,
    }))
}

/// Get a bot's live runtime status.
#[utoipa::path(
    get,
    path = "/api/v1/bots/{bot_id}/status",
    params(
        ("bot_id" = String, Path, description = "Bot identifier")
    ),
    responses(
        (status = 200, description = "Runtime status", body = BotStatusResponse),
        (status = 404, description = "Bot or container not found"),
        (status = 503, description = "Runtime unavailable")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn get_bot_status(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
) -> Result<Json<BotStatusResponse>, ApiError> {
    tenant.require(Permission::Read)?;

    let runtime = state
        .orchestrator
        .get_status(&tenant.tenant_id, &bot_id)
        .await?;
    // Re-read: the status call may have recorded drift
    let bot = state
        .orchestrator
        .get_bot(&tenant.tenant_id, &bot_id)
        .await?;

    Ok(Json(BotStatusResponse {
        bot: bot.into(),
        runtime,
    }))
}

/// Get a bot's recent output.
#[utoipa::path(
    get,
    path = "/api/v1/bots/{bot_id}/logs",
    params(
        ("bot_id" = String, Path, description = "Bot identifier"),
        LogsQuery
    ),
    responses(
        (status = 200, description = "Recent output", body = BotLogsResponse),
        (status = 400, description = "Invalid tail"),
        (status = 404, description = "Bot or container not found")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn get_bot_logs(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<BotLogsResponse>, ApiError> {
    tenant.require(Permission::Read)?;
    validate_tail(query.tail, state.config.orchestrator.max_log_tail)?;

    let logs = state
        .orchestrator
        .get_logs(&tenant.tenant_id, &bot_id, query.tail)
        .await?
        .ok_or_else(|| ApiError::ContainerNotFound(format!("bot {} has no container", bot_id)))?;

    Ok(Json(BotLogsResponse {
        tail: state.orchestrator.effective_tail(query.tail),
        bot_id,
        logs,
    }))
}

/// Rejects a tail outside `1..=max`.
pub(crate) fn validate_tail(tail: Option<usize>, max: usize) -> Result<(), ApiError> {
    match tail {
        Some(t) if t == 0 || t > max => Err(ApiError::InvalidRequest(format!(
            "tail must be between 1 and {}",
            max
        ))),
        _ => Ok(()),
    }
}

/// Start a stopped or failed bot from its existing configuration.
#[utoipa::path(
    post,
    path = "/api/v1/bots/{bot_id}/start",
    params(
        ("bot_id" = String, Path, description = "Bot identifier")
    ),
    responses(
        (status = 200, description = "Bot running", body = BotResponse),
        (status = 404, description = "Bot not found"),
        (status = 409, description = "Bot is not stopped")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn start_bot(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
) -> Result<Json<BotResponse>, ApiError> {
    tenant.require(Permission::Manage)?;

    let bot = state
        .orchestrator
        .start_bot(&tenant.tenant_id, &bot_id)
        .await?;

    Ok(Json(bot.into()))
}

/// Stop a bot, keeping its record and configuration.
#[utoipa::path(
    post,
    path = "/api/v1/bots/{bot_id}/stop",
    params(
        ("bot_id" = String, Path, description = "Bot identifier")
    ),
    responses(
        (status = 200, description = "Bot stopped", body = BotResponse),
        (status = 404, description = "Bot not found"),
        (status = 409, description = "Bot is not running")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn stop_bot(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
) -> Result<Json<BotResponse>, ApiError> {
    tenant.require(Permission::Manage)?;

    let bot = state
        .orchestrator
        .stop_bot(&tenant.tenant_id, &bot_id)
        .await?;

    Ok(Json(bot.into()))
}

/// Restart a bot.
#[utoipa::path(
    post,
    path = "/api/v1/bots/{bot_id}/restart",
    params(
        ("bot_id" = String, Path, description = "Bot identifier")
    ),
    responses(
        (status = 200, description = "Bot running", body = BotResponse),
        (status = 404, description = "Bot not found"),
        (status = 409, description = "Bot is mid-transition")
    ),
    security(("api_key" = [])),
    tag = "Bots"
)]
pub async fn restart_bot(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(bot_id): Path<String>,
) -> Result<Json<BotResponse>, ApiError> {
    tenant.require(Permission::Manage)?;

    let bot = state
        .orchestrator
        .restart_bot(&tenant.tenant_id, &bot_id)
        .await?;

    Ok(Json(bot.into()))
}

// ============================================================================
// API Keys
// ============================================================================

/// Mint an API key for the caller's tenant.
#[utoipa::path(
    post,
    path = "/api/v1/auth/keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, description = "Key created; the raw key is shown once", body = CreateApiKeyResponse),
        (status = 403, description = "Admin permission required")
    ),
    security(("api_key" = [])),
    tag = "Authentication"
)]
pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ApiError> {
    tenant.require(Permission::Admin)?;

    if request.name.trim().is_empty() {
        return Err(ApiError::InvalidRequest("name cannot be empty".to_string()));
    }
    if request.permissions.is_empty() {
        return Err(ApiError::InvalidRequest(
            "at least one permission is required".to_string(),
        ));
    }
    let rate_limit = request.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT);
    if rate_limit == 0 {
        return Err(ApiError::InvalidRequest(
            "rate_limit must be positive".to_string(),
        ));
    }

    let (key_id, api_key) = state.api_key_store.create_key(
        &tenant.tenant_id,
        request.name,
        request.permissions.clone(),
        rate_limit,
    );
    info!(tenant_id = %tenant.tenant_id, key_id = %key_id, "API key created");

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            key_id,
            api_key,
            tenant_id: tenant.tenant_id,
            permissions: request.permissions,
        }),
    ))
}

/// List the caller's tenant keys.
#[utoipa::path(
    get,
    path = "/api/v1/auth/keys",
    responses(
        (status = 200, description = "Keys of the tenant", body = ApiKeysListResponse),
        (status = 403, description = "Admin permission required")
    ),
    security(("api_key" = [])),
    tag = "Authentication"
)]
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
) -> Result<Json<ApiKeysListResponse>, ApiError> {
    tenant.require(Permission::Admin)?;

    Ok(Json(ApiKeysListResponse {
        keys: state.api_key_store.list_keys(&tenant.tenant_id),
    }))
}

/// Revoke one of the caller's tenant keys.
#[utoipa::path(
    delete,
    path = "/api/v1/auth/keys/{key_id}",
    params(
        ("key_id" = String, Path, description = "Key identifier")
    ),
    responses(
        (status = 204, description = "Key revoked"),
        (status = 404, description = "Key not found")
    ),
    security(("api_key" = [])),
    tag = "Authentication"
)]
pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    Extension(tenant): Extension<TenantContext>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    tenant.require(Permission::Admin)?;

    if state.api_key_store.delete_key(&tenant.tenant_id, &key_id) {
        info!(tenant_id = %tenant.tenant_id, key_id = %key_id, "API key revoked");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::KeyNotFound(key_id))
    }
}
