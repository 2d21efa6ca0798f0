//! Integration tests for the Tradebot Orchestrator API.
//!
//! Each test spawns the full router on an ephemeral port, backed by the
//! in-memory registry and container runtime, and talks to it through
//! `orchestrator-client`.

use orchestrator_client::{ClientConfig, OrchestratorClient};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tradebot_orchestrator::api::create_router;
use tradebot_orchestrator::config::{BootstrapKey, Config, RuntimeBackend};
use tradebot_orchestrator::models::Permission;
use tradebot_orchestrator::orchestrator::Orchestrator;
use tradebot_orchestrator::registry::InMemoryBotRegistry;
use tradebot_orchestrator::runtime::MemoryRuntime;
use tradebot_orchestrator::state::AppState;

/// Admin key of tenant `acme`.
pub const ACME_ADMIN_KEY: &str = "tbo_acme_test_admin_key_0001";
/// Read-only key of tenant `acme`.
pub const ACME_READ_KEY: &str = "tbo_acme_test_read_key_00001";
/// Manage key of tenant `globex`.
pub const GLOBEX_MANAGE_KEY: &str = "tbo_globex_test_manage_key_01";

/// A running orchestrator bound to `127.0.0.1`.
pub struct TestServer {
    /// Base URL, e.g. `http://127.0.0.1:41234`.
    pub base_url: String,
    /// Simulated container runtime, for failure injection and log lines.
    pub runtime: Arc<MemoryRuntime>,
    /// Storage root holding rendered artifacts.
    pub storage: TempDir,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Starts a server with a `port_count`-wide host port range.
    ///
    /// # Panics
    /// Panics if the server cannot be set up.
    pub async fn spawn_with_ports(port_count: u16) -> Self {
        let storage = tempfile::tempdir().expect("tempdir");

        let mut config = Config::default();
        config.runtime.backend = RuntimeBackend::Memory;
        config.runtime.call_timeout_secs = 2;
        config.runtime.start_timeout_secs = 2;
        config.orchestrator.storage_root = storage.path().to_path_buf();
        config.orchestrator.port_range_start = 20_000;
        config.orchestrator.port_range_end = 20_000 + port_count;
        config.auth.keys = vec![
            bootstrap("acme", "acme-admin", ACME_ADMIN_KEY, Permission::Admin),
            bootstrap("acme", "acme-read", ACME_READ_KEY, Permission::Read),
            bootstrap("globex", "globex-ops", GLOBEX_MANAGE_KEY, Permission::Manage),
        ];

        let runtime = Arc::new(MemoryRuntime::new());
        let orchestrator = Orchestrator::new(
            config.orchestrator_settings(),
            Arc::new(InMemoryBotRegistry::new()),
            runtime.clone(),
        )
        .expect("orchestrator");
        let state = Arc::new(AppState::new(Arc::new(orchestrator), config));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let app = create_router(state);
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{}", addr),
            runtime,
            storage,
            handle,
        }
    }

    /// Starts a server with a roomy port range.
    pub async fn spawn() -> Self {
        Self::spawn_with_ports(100).await
    }

    /// Client authenticating with `api_key`.
    ///
    /// # Panics
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn client(&self, api_key: &str) -> OrchestratorClient {
        OrchestratorClient::new(ClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(10),
            api_key: Some(api_key.to_string()),
        })
        .expect("client")
    }

    /// Client without credentials.
    ///
    /// # Panics
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn anonymous(&self) -> OrchestratorClient {
        OrchestratorClient::new(ClientConfig {
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(10),
            api_key: None,
        })
        .expect("client")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn bootstrap(tenant_id: &str, name: &str, key: &str, permission: Permission) -> BootstrapKey {
    BootstrapKey {
        tenant_id: tenant_id.to_string(),
        name: name.to_string(),
        key: key.to_string(),
        permissions: vec![permission],
        rate_limit: None,
    }
}

/// Generates a unique bot name so tests never collide.
#[must_use]
pub fn unique_name(prefix: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{}_{}", prefix, counter)
}
