//! # Tradebot Orchestrator - Multi-Tenant Bot Control Plane
//!
//! Provisions, tears down and observes containerized trading bots on behalf of
//! many tenants. Each bot is one worker container with its own rendered config
//! file, data directory and host port. Built with
//! [Axum](https://crates.io/crates/axum) for the REST API,
//! [bollard](https://crates.io/crates/bollard) for Docker and
//! [sqlx](https://crates.io/crates/sqlx) for the registry.
//!
//! ## Key Features
//!
//! - **Port Allocation**: Host ports are drawn from a configured range and
//!   derived from the registry, so a restart never hands out a taken port.
//!
//! - **Config Materialization**: A validated [`models::BotConfig`] is rendered
//!   into a per-bot `config.json` under a tenant-scoped directory.
//!
//! - **Container Lifecycle**: Stale containers are reconciled before start, every
//!   runtime call carries a deadline, and failures leave the bot in `error`
//!   with a reason instead of stuck mid-transition.
//!
//! - **Status and Logs**: Live container state, recent output, and streaming
//!   output over WebSocket.
//!
//! - **Tenant Isolation**: API keys are bound to a tenant; every registry lookup
//!   is scoped by it.
//!
//! ## Architecture
//!
//! ```text
//! REST API ──► Orchestrator ──┬─► PortAllocator ──────┐
//!                             ├─► ConfigMaterializer  ├─► BotRegistry (Postgres | memory)
//!                             ├─► LifecycleManager ───┼─► ContainerRuntime (Docker | memory)
//!                             └─► LogReader ──────────┘
//! ```
//!
//! ## Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`api`] | Route handlers, authentication middleware, WebSocket log streaming |
//! | [`auth`] | Tenant API keys and rate limiting |
//! | [`config`] | TOML configuration |
//! | [`db`] | PostgreSQL pool and registry |
//! | [`error`] | Orchestrator and API error types |
//! | [`models`] | Domain types and request/response DTOs |
//! | [`orchestrator`] | Port allocation, config materialization, lifecycle, logs |
//! | [`registry`] | Registry trait and in-memory implementation |
//! | [`runtime`] | Container runtime trait, Docker and in-memory backends |
//! | [`state`] | Application state |
//!
//! ## API Endpoints
//!
//! | Method | Endpoint | Description |
//! |--------|----------|-------------|
//! | GET | `/health` | Health check |
//! | POST | `/api/v1/bots` | Provision a bot |
//! | GET | `/api/v1/bots` | List the tenant's bots |
//! | GET | `/api/v1/bots/{bot_id}` | Registry record |
//! | DELETE | `/api/v1/bots/{bot_id}` | Deprovision |
//! | GET | `/api/v1/bots/{bot_id}/status` | Live runtime status |
//! | GET | `/api/v1/bots/{bot_id}/logs` | Recent output |
//! | GET | `/api/v1/bots/{bot_id}/logs/ws` | Streaming output |
//! | POST | `/api/v1/bots/{bot_id}/start` | Start a stopped bot |
//! | POST | `/api/v1/bots/{bot_id}/stop` | Stop a running bot |
//! | POST | `/api/v1/bots/{bot_id}/restart` | Restart a bot |
//! | POST/GET | `/api/v1/auth/keys` | Mint / list tenant keys |
//! | DELETE | `/api/v1/auth/keys/{key_id}` | Revoke a key |
//!
//! ## Example Usage
//!
//! ```bash
//! # In-memory runtime and registry, bootstrap keys from config/orchestrator.toml
//! CONFIG_PATH=config/orchestrator.toml cargo run
//!
//! # Provision a bot
//! curl -X POST http://localhost:8000/api/v1/bots \
//!   -H "X-API-Key: $KEY" -H "Content-Type: application/json" \
//!   -d '{"exchange_name": "binance", "api_key": "k", "api_secret": "s",
//!        "stake_currency": "USDT", "stake_amount": 100}'
//!
//! # Tail its output
//! curl -H "X-API-Key: $KEY" "http://localhost:8000/api/v1/bots/ft-acme-main/logs?tail=50"
//! ```
//!
//! Interactive API documentation is served at `/swagger-ui/`.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod runtime;
pub mod state;
