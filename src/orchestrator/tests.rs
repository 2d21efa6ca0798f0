use super::*;
use crate::registry::InMemoryBotRegistry;
use crate::runtime::MemoryRuntime;
use futures::StreamExt;
use std::collections::HashSet;
use tempfile::TempDir;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    runtime: Arc<MemoryRuntime>,
    registry: Arc<InMemoryBotRegistry>,
    dir: TempDir,
}

fn harness_with(port_range: Range<u16>, runtime: MemoryRuntime) -> Harness {
    let dir = TempDir::new().unwrap();
    let runtime = Arc::new(runtime);
    let registry = Arc::new(InMemoryBotRegistry::new());
    let settings = OrchestratorSettings {
        port_range,
        storage_root: dir.path().to_path_buf(),
        lifecycle: LifecycleSettings {
            call_timeout: Duration::from_secs(1),
            start_timeout: Duration::from_secs(1),
            stop_grace: Duration::from_millis(100),
            ..LifecycleSettings::default()
        },
        ..OrchestratorSettings::default()
    };
    let orchestrator =
        Orchestrator::new(settings, registry.clone(), runtime.clone()).unwrap();
    Harness {
        orchestrator: Arc::new(orchestrator),
        runtime,
        registry,
        dir,
    }
}

fn harness() -> Harness {
    harness_with(8081..9000, MemoryRuntime::new())
}

fn config(name: &str) -> BotConfig {
    BotConfig {
        name: name.to_string(),
        exchange_name: "binance".to_string(),
        api_key: "key".to_string(),
        api_secret: "secret".to_string(),
        dry_run: true,
        stake_currency: "USDT".to_string(),
        stake_amount: 100.0,
        strategy: "SampleStrategy".to_string(),
        pair_whitelist: None,
        max_open_trades: 3,
        timeframe: None,
        telegram_enabled: false,
        telegram_token: None,
        telegram_chat_id: None,
    }
}

// ============================================================================
// Provisioning
// ============================================================================

#[tokio::test]
async fn test_provision_three_tenants() {
    let h = harness();
    let mut ports = HashSet::new();

    for tenant in ["t1", "t2", "t3"] {
        let bot = h.orchestrator.provision(tenant, config("main")).await.unwrap();
        assert_eq!(bot.bot_id, format!("ft-{}-main", tenant));
        assert_eq!(bot.status, BotStatus::Running);
        assert!(bot.runtime_handle.is_some());
        assert!((8081..9000).contains(&bot.exposed_port));
        assert!(ports.insert(bot.exposed_port));

        let body = std::fs::read_to_string(&bot.config_artifact_path).unwrap();
        let rendered: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(rendered["stake_currency"], "USDT");
        assert_eq!(rendered["dry_run"], true);
    }

    assert_eq!(h.runtime.running().len(), 3);
}

#[tokio::test]
async fn test_provision_rejects_invalid_input() {
    let h = harness();

    let err = h.orchestrator.provision("Bad Tenant", config("main")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));

    let mut bad = config("main");
    bad.stake_amount = -1.0;
    let err = h.orchestrator.provision("acme", bad).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));

    assert!(h.registry.is_empty());
    assert_eq!(h.runtime.container_count(), 0);
}

#[tokio::test]
async fn test_provision_active_bot_conflicts() {
    let h = harness();
    h.orchestrator.provision("acme", config("main")).await.unwrap();

    let err = h.orchestrator.provision("acme", config("main")).await.unwrap_err();
    match err {
        OrchestratorError::ConflictingState { current, .. } => {
            assert_eq!(current, BotStatus::Running);
        }
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[tokio::test]
async fn test_concurrent_provision_of_same_bot() {
    let h = harness();
    h.runtime.set_start_delay(Some(Duration::from_millis(100)));

    let first = {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move { orchestrator.provision("acme", config("main")).await })
    };
    let second = {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move { orchestrator.provision("acme", config("main")).await })
    };

    let results = [first.await.unwrap(), second.await.unwrap()];
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(OrchestratorError::ConflictingState { .. })))
        .count();
    assert_eq!((ok, conflicts), (1, 1));
    assert_eq!(h.runtime.container_count(), 1);
}

#[tokio::test]
async fn test_concurrent_provisions_get_distinct_ports() {
    let h = harness();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let orchestrator = Arc::clone(&h.orchestrator);
            tokio::spawn(async move {
                orchestrator
                    .provision(&format!("tenant{}", i), config("main"))
                    .await
            })
        })
        .collect();

    let mut ports = HashSet::new();
    for task in tasks {
        let bot = task.await.unwrap().unwrap();
        assert!(ports.insert(bot.exposed_port), "port {} handed out twice", bot.exposed_port);
    }
    assert_eq!(h.orchestrator.ports().reserved(), 0);
}

#[tokio::test]
async fn test_port_exhaustion() {
    let h = harness_with(8081..8083, MemoryRuntime::new());
    h.orchestrator.provision("a", config("main")).await.unwrap();
    h.orchestrator.provision("b", config("main")).await.unwrap();

    let err = h.orchestrator.provision("c", config("main")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ResourceExhausted { start: 8081, end: 8083 }));
    assert!(h.registry.get("c", "ft-c-main").await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_start_leaves_error_record() {
    let h = harness();
    h.runtime.set_fail_start(true);

    let err = h.orchestrator.provision("acme", config("main")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Runtime(_)));

    let bot = h.orchestrator.get_bot("acme", "ft-acme-main").await.unwrap();
    assert_eq!(bot.status, BotStatus::Error);
    assert!(bot.status_reason.unwrap().contains("simulated failure"));
    assert_eq!(h.runtime.container_count(), 0);

    // Error keeps the port, and a retry reuses it
    h.runtime.set_fail_start(false);
    let retried = h.orchestrator.provision("acme", config("main")).await.unwrap();
    assert_eq!(retried.status, BotStatus::Running);
    assert_eq!(retried.exposed_port, bot.exposed_port);
    assert!(retried.status_reason.is_none());
}

#[tokio::test]
async fn test_start_timeout_is_recorded() {
    let h = harness();
    h.runtime.set_start_delay(Some(Duration::from_secs(5)));

    let err = h.orchestrator.provision("acme", config("main")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Timeout { operation: "start_container", .. }));

    let bot = h.orchestrator.get_bot("acme", "ft-acme-main").await.unwrap();
    assert_eq!(bot.status, BotStatus::Error);
}

#[tokio::test]
async fn test_missing_image_is_typed() {
    let h = harness_with(8081..9000, MemoryRuntime::new().with_images(["other:latest"]));

    let err = h.orchestrator.provision("acme", config("main")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ImageNotFound(_)));
}

#[tokio::test]
async fn test_runtime_unavailable_is_typed() {
    let h = harness();
    h.runtime.set_available(false);

    let err = h.orchestrator.provision("acme", config("main")).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::RuntimeUnavailable(_)));
    assert!(h.orchestrator.ping_runtime().await.is_err());
}

// ============================================================================
// Deprovisioning
// ============================================================================

#[tokio::test]
async fn test_deprovision_removes_everything() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    assert!(h.orchestrator.deprovision("acme", &bot.bot_id).await.unwrap());

    assert_eq!(h.runtime.container_count(), 0);
    assert!(h.registry.is_empty());
    assert!(!bot.config_artifact_path.exists());
    // Data is kept unless purging is configured
    assert!(bot.data_dir_path.exists());

    // Port is free again
    let next = h.orchestrator.provision("beta", config("main")).await.unwrap();
    assert_eq!(next.exposed_port, bot.exposed_port);
}

#[tokio::test]
async fn test_deprovision_unknown_is_noop() {
    let h = harness();
    assert!(!h.orchestrator.deprovision("acme", "ft-acme-main").await.unwrap());

    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    assert!(h.orchestrator.deprovision("acme", &bot.bot_id).await.unwrap());
    assert!(!h.orchestrator.deprovision("acme", &bot.bot_id).await.unwrap());
}

#[tokio::test]
async fn test_deprovision_is_tenant_scoped() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    assert!(!h.orchestrator.deprovision("beta", &bot.bot_id).await.unwrap());
    assert_eq!(h.runtime.running(), vec![bot.bot_id.clone()]);
}

#[tokio::test]
async fn test_deprovision_with_runtime_down_keeps_record() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    h.runtime.set_available(false);

    let err = h.orchestrator.deprovision("acme", &bot.bot_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::RuntimeUnavailable(_)));

    let record = h.orchestrator.get_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(record.status, BotStatus::Error);

    h.runtime.set_available(true);
    assert!(h.orchestrator.deprovision("acme", &bot.bot_id).await.unwrap());
}

#[tokio::test]
async fn test_deprovision_purges_data_when_configured() {
    let dir = TempDir::new().unwrap();
    let settings = OrchestratorSettings {
        storage_root: dir.path().to_path_buf(),
        purge_data_on_deprovision: true,
        ..OrchestratorSettings::default()
    };
    let orchestrator = Orchestrator::new(
        settings,
        Arc::new(InMemoryBotRegistry::new()),
        Arc::new(MemoryRuntime::new()),
    )
    .unwrap();

    let bot = orchestrator.provision("acme", config("main")).await.unwrap();
    assert!(orchestrator.deprovision("acme", &bot.bot_id).await.unwrap());
    assert!(!bot.data_dir_path.exists());
}

#[tokio::test]
async fn test_start_waits_out_deprovision_of_stopped_bot() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    h.orchestrator.stop_bot("acme", &bot.bot_id).await.unwrap();
    h.runtime.set_stop_delay(Some(Duration::from_millis(300)));

    let orchestrator = h.orchestrator.clone();
    let bot_id = bot.bot_id.clone();
    let deprovision =
        tokio::spawn(async move { orchestrator.deprovision("acme", &bot_id).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Deprovision is still inside the slow stop here
    let started = h.orchestrator.start_bot("acme", &bot.bot_id).await;

    assert!(deprovision.await.unwrap().unwrap());
    assert!(matches!(started, Err(OrchestratorError::UnknownBot(_))));
    assert!(h.registry.is_empty());
    assert_eq!(h.runtime.container_count(), 0);
    assert!(!bot.config_artifact_path.exists());
}

#[tokio::test]
async fn test_lock_table_does_not_grow() {
    let h = harness();

    for i in 0..1000 {
        let bot_id = format!("ft-acme-ghost{}", i);
        assert!(!h.orchestrator.deprovision("acme", &bot_id).await.unwrap());
        let err = h.orchestrator.stop_bot("acme", &bot_id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::UnknownBot(_)));
    }
    assert!(h.orchestrator.locks.is_empty());

    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    h.orchestrator.get_status("acme", &bot.bot_id).await.unwrap();
    assert!(h.orchestrator.deprovision("acme", &bot.bot_id).await.unwrap());
    assert!(h.orchestrator.locks.is_empty());
}

// ============================================================================
// Control
// ============================================================================

#[tokio::test]
async fn test_stop_and_start_keep_artifacts() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    let stopped = h.orchestrator.stop_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(stopped.status, BotStatus::Stopped);
    assert!(stopped.runtime_handle.is_none());
    assert!(bot.config_artifact_path.exists());
    assert_eq!(h.runtime.container_count(), 0);

    let err = h.orchestrator.stop_bot("acme", &bot.bot_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ConflictingState { .. }));

    let started = h.orchestrator.start_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(started.status, BotStatus::Running);
    assert_eq!(started.exposed_port, bot.exposed_port);
}

#[tokio::test]
async fn test_start_running_bot_conflicts() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    let err = h.orchestrator.start_bot("acme", &bot.bot_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ConflictingState { current: BotStatus::Running, .. }));
}

#[tokio::test]
async fn test_start_without_artifact_fails() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    h.orchestrator.stop_bot("acme", &bot.bot_id).await.unwrap();
    std::fs::remove_file(&bot.config_artifact_path).unwrap();

    let err = h.orchestrator.start_bot("acme", &bot.bot_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::ArtifactWrite { .. }));
    let record = h.orchestrator.get_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(record.status, BotStatus::Error);
}

#[tokio::test]
async fn test_restart_replaces_container() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    let restarted = h.orchestrator.restart_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(restarted.status, BotStatus::Running);
    assert_ne!(restarted.runtime_handle, bot.runtime_handle);
    assert_eq!(h.runtime.container_count(), 1);
}

#[tokio::test]
async fn test_recover_moves_stranded_bots_to_error() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    h.registry
        .update_status("acme", &bot.bot_id, StatusUpdate::new(BotStatus::Creating))
        .await
        .unwrap();

    assert_eq!(h.orchestrator.recover().await.unwrap(), 1);
    let record = h.orchestrator.get_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(record.status, BotStatus::Error);
    assert_eq!(record.status_reason.as_deref(), Some("interrupted while creating"));

    assert_eq!(h.orchestrator.recover().await.unwrap(), 0);
}

// ============================================================================
// Observation
// ============================================================================

#[tokio::test]
async fn test_get_status_reports_runtime_state() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    let snapshot = h.orchestrator.get_status("acme", &bot.bot_id).await.unwrap();
    assert_eq!(snapshot.state, ContainerState::Running);
    assert_eq!(Some(snapshot.container_id), bot.runtime_handle);
    assert!(snapshot.ports.iter().any(|p| p.host_port == Some(bot.exposed_port)));
}

#[tokio::test]
async fn test_get_status_records_drift() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    assert!(h.runtime.kill(&bot.bot_id));

    let snapshot = h.orchestrator.get_status("acme", &bot.bot_id).await.unwrap();
    assert_eq!(snapshot.state, ContainerState::Exited);

    let record = h.orchestrator.get_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(record.status, BotStatus::Error);
    assert_eq!(record.status_reason.as_deref(), Some("container is exited"));
}

#[tokio::test]
async fn test_get_status_distinguishes_missing_from_unavailable() {
    let h = harness();
    let err = h.orchestrator.get_status("acme", "ft-acme-main").await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownBot(_)));

    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();
    h.runtime.set_available(false);
    let err = h.orchestrator.get_status("acme", &bot.bot_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::RuntimeUnavailable(_)));
    let record = h.orchestrator.get_bot("acme", &bot.bot_id).await.unwrap();
    assert_eq!(record.status, BotStatus::Running);

    h.runtime.set_available(true);
    h.orchestrator.stop_bot("acme", &bot.bot_id).await.unwrap();
    let err = h.orchestrator.get_status("acme", &bot.bot_id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_get_logs() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    let logs = h.orchestrator.get_logs("acme", &bot.bot_id, Some(10)).await.unwrap().unwrap();
    assert!(logs.contains("Starting HTTP Server"));

    let err = h.orchestrator.get_logs("beta", &bot.bot_id, None).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownBot(_)));

    h.orchestrator.stop_bot("acme", &bot.bot_id).await.unwrap();
    assert!(h.orchestrator.get_logs("acme", &bot.bot_id, None).await.unwrap().is_none());
}

#[tokio::test]
async fn test_follow_logs() {
    let h = harness();
    let bot = h.orchestrator.provision("acme", config("main")).await.unwrap();

    let mut stream = h
        .orchestrator
        .follow_logs("acme", &bot.bot_id, Some(1))
        .await
        .unwrap()
        .unwrap();
    assert!(stream.next().await.unwrap().unwrap().contains("Starting HTTP Server"));

    h.runtime.push_log(&bot.bot_id, "heartbeat ok");
    assert_eq!(stream.next().await.unwrap().unwrap(), "heartbeat ok\n");
}

#[tokio::test]
async fn test_list_bots_is_tenant_scoped() {
    let h = harness();
    h.orchestrator.provision("acme", config("main")).await.unwrap();
    h.orchestrator.provision("acme", config("scalper")).await.unwrap();
    h.orchestrator.provision("beta", config("main")).await.unwrap();

    let acme = h.orchestrator.list_bots("acme", 0, 100).await.unwrap();
    assert_eq!(acme.len(), 2);
    assert!(acme.iter().all(|b| b.tenant_id == "acme"));

    let page = h.orchestrator.list_bots("acme", 1, 100).await.unwrap();
    assert_eq!(page.len(), 1);

    assert!(h.dir.path().join("configs").join("beta").exists());
}
