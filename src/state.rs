//! Application state management.

use crate::auth::{ApiKeyStore, DEFAULT_RATE_LIMIT};
use crate::config::Config;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use tracing::info;

/// Application state shared across all handlers.
pub struct AppState {
    /// Bot lifecycle orchestrator.
    pub orchestrator: Arc<Orchestrator>,
    /// Tenant API keys and rate limits.
    pub api_key_store: ApiKeyStore,
    /// Application configuration.
    pub config: Config,
}

impl AppState {
    /// Creates the state and registers the configured bootstrap keys.
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>, config: Config) -> Self {
        let api_key_store = ApiKeyStore::new();
        for key in &config.auth.keys {
            api_key_store.insert_key(
                &key.tenant_id,
                key.name.clone(),
                &key.key,
                key.permissions.clone(),
                key.rate_limit.unwrap_or(DEFAULT_RATE_LIMIT),
            );
        }
        if !config.auth.keys.is_empty() {
            info!(count = config.auth.keys.len(), "Bootstrap API keys registered");
        }

        Self {
            orchestrator,
            api_key_store,
            config,
        }
    }
}
