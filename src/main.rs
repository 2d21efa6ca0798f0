//! Tradebot Orchestrator Server
//!
//! REST API server that provisions and supervises containerized trading bots.

use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use tradebot_orchestrator::api::{API_KEY_HEADER, create_router};
use tradebot_orchestrator::config::{Config, RuntimeBackend};
use tradebot_orchestrator::db::{DatabasePool, PgBotRegistry};
use tradebot_orchestrator::models::{
    ApiKeyInfo, ApiKeysListResponse, BotConfig, BotLogsResponse, BotResponse, BotStatus,
    BotStatusResponse, BotsListResponse, ContainerState, CreateApiKeyRequest,
    CreateApiKeyResponse, DeleteBotResponse, HealthResponse, Permission, PortMapping,
    StatusSnapshot,
};
use tradebot_orchestrator::orchestrator::Orchestrator;
use tradebot_orchestrator::registry::{BotRegistry, InMemoryBotRegistry};
use tradebot_orchestrator::runtime::{ContainerRuntime, DockerRuntime, MemoryRuntime};
use tradebot_orchestrator::state::AppState;

/// Default configuration file, overridden by `CONFIG_PATH`.
const DEFAULT_CONFIG_PATH: &str = "config/orchestrator.toml";

/// OpenAPI documentation.
#[derive(OpenApi)]
#[openapi(
    paths(
        tradebot_orchestrator::api::handlers::health_check,
        tradebot_orchestrator::api::handlers::create_bot,
        tradebot_orchestrator::api::handlers::list_bots,
        tradebot_orchestrator::api::handlers::get_bot,
        tradebot_orchestrator::api::handlers::delete_bot,
        tradebot_orchestrator::api::handlers::get_bot_status,
        tradebot_orchestrator::api::handlers::get_bot_logs,
        tradebot_orchestrator::api::handlers::start_bot,
        tradebot_orchestrator::api::handlers::stop_bot,
        tradebot_orchestrator::api::handlers::restart_bot,
        tradebot_orchestrator::api::handlers::create_api_key,
        tradebot_orchestrator::api::handlers::list_api_keys,
        tradebot_orchestrator::api::handlers::delete_api_key,
        tradebot_orchestrator::api::websocket::logs_ws_handler,
    ),
    components(
        schemas(
            HealthResponse,
            BotConfig,
            BotStatus,
            BotResponse,
            BotsListResponse,
            DeleteBotResponse,
            ContainerState,
            PortMapping,
            StatusSnapshot,
            BotStatusResponse,
            BotLogsResponse,
            Permission,
            CreateApiKeyRequest,
            CreateApiKeyResponse,
            ApiKeyInfo,
            ApiKeysListResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Bots", description = "Bot provisioning and lifecycle"),
        (name = "Authentication", description = "Tenant API key management"),
        (name = "WebSocket", description = "Streaming bot output"),
    ),
    info(
        title = "Tradebot Orchestrator API",
        version = "0.1.0",
        description = "REST API for provisioning and supervising containerized trading bots",
        license(name = "MIT"),
        contact(name = "Joaquin Bejar", email = "jb@taunais.com")
    )
)]
struct ApiDoc;

/// Registers the `X-API-Key` header scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "api_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(API_KEY_HEADER))),
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path =
        std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;
    info!(path = %config_path, "Configuration loaded");

    let registry: Arc<dyn BotRegistry> = match &config.database.url {
        Some(url) => {
            let db = DatabasePool::new(url, config.database.max_connections).await?;
            db.run_migrations().await?;
            info!("Registry backed by PostgreSQL");
            Arc::new(PgBotRegistry::new(db))
        }
        None => {
            warn!("No database configured; bot registry is in memory and lost on exit");
            Arc::new(InMemoryBotRegistry::new())
        }
    };

    let runtime: Arc<dyn ContainerRuntime> = match config.runtime.backend {
        RuntimeBackend::Docker => Arc::new(DockerRuntime::connect(config.runtime.pull_images)?),
        RuntimeBackend::Memory => {
            warn!("Using in-memory container runtime; no workers will actually run");
            Arc::new(MemoryRuntime::new())
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator_settings(),
        registry,
        runtime,
    )?);

    match orchestrator.ping_runtime().await {
        Ok(()) => info!(runtime = orchestrator.runtime_name(), "Container runtime reachable"),
        Err(e) => warn!(runtime = orchestrator.runtime_name(), error = %e, "Container runtime unreachable"),
    }

    let recovered = orchestrator.recover().await?;
    if recovered > 0 {
        warn!(count = recovered, "Bots interrupted mid-transition marked as error");
    }

    if config.auth.keys.is_empty() {
        warn!("No bootstrap API keys configured; every API request will be rejected");
    }

    let host = config.server.host.clone();
    let port = config.server.port;
    let state = Arc::new(AppState::new(orchestrator, config));

    info!("Starting Tradebot Orchestrator on {}:{}", host, port);
    info!("Swagger UI available at http://{}:{}/swagger-ui/", host, port);

    // Configure CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the router
    let app = create_router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start the server
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
