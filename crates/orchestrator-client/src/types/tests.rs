//! Unit tests for types module.

use super::*;

// ============================================================================
// Enum Tests
// ============================================================================

#[test]
fn test_bot_status_wire_names() {
    assert_eq!(serde_json::to_string(&BotStatus::Running).unwrap(), "\"running\"");
    let status: BotStatus = serde_json::from_str("\"stopping\"").unwrap();
    assert_eq!(status, BotStatus::Stopping);
    assert_eq!(BotStatus::Error.to_string(), "error");
}

#[test]
fn test_container_state_unrecognized_is_unknown() {
    let state: ContainerState = serde_json::from_str("\"exited\"").unwrap();
    assert_eq!(state, ContainerState::Exited);

    let state: ContainerState = serde_json::from_str("\"hibernating\"").unwrap();
    assert_eq!(state, ContainerState::Unknown);
}

#[test]
fn test_permission_serialization() {
    let json = serde_json::to_string(&vec![Permission::Read, Permission::Admin]).unwrap();
    assert_eq!(json, r#"["read","admin"]"#);
}

// ============================================================================
// BotConfig Tests
// ============================================================================

#[test]
fn test_bot_config_defaults() {
    let config = BotConfig::new("binance", "k", "s", "USDT", 100.0);
    assert_eq!(config.name, "main");
    assert!(config.dry_run);
    assert_eq!(config.strategy, "SampleStrategy");
    assert_eq!(config.max_open_trades, 3);
}

#[test]
fn test_bot_config_skips_absent_optionals() {
    let config = BotConfig::new("binance", "k", "s", "USDT", 100.0);
    let json = serde_json::to_value(&config).unwrap();
    assert!(json.get("pair_whitelist").is_none());
    assert!(json.get("telegram_token").is_none());
    assert_eq!(json["stake_currency"], "USDT");

    let config = config.with_name("alt").with_pairs(&["BTC/USDT"]);
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["name"], "alt");
    assert_eq!(json["pair_whitelist"][0], "BTC/USDT");
}

// ============================================================================
// Response Tests
// ============================================================================

#[test]
fn test_bot_response_deserialization() {
    let json = r#"{
        "bot_id": "ft-acme-main",
        "name": "main",
        "tenant_id": "acme",
        "status": "error",
        "status_reason": "container exited",
        "host_port": 8081,
        "container_id": null,
        "image": "freqtradeorg/freqtrade:stable",
        "config_path": "/srv/acme/main/config.json",
        "user_data_path": "/srv/acme/main/user_data",
        "created_at": "2024-05-01T12:00:00Z",
        "updated_at": "2024-05-01T12:05:00Z"
    }"#;

    let bot: BotResponse = serde_json::from_str(json).unwrap();
    assert_eq!(bot.status, BotStatus::Error);
    assert_eq!(bot.status_reason.as_deref(), Some("container exited"));
    assert_eq!(bot.host_port, 8081);
    assert!(bot.container_id.is_none());
}

#[test]
fn test_list_query_encoding() {
    let query = ListBotsQuery {
        skip: Some(10),
        limit: None,
    };
    assert_eq!(serde_urlencoded::to_string(&query).unwrap(), "skip=10");
    assert_eq!(
        serde_urlencoded::to_string(ListBotsQuery::default()).unwrap(),
        ""
    );
}

#[test]
fn test_error_body_deserialization() {
    let body: ErrorBody =
        serde_json::from_str(r#"{"error":"Conflict: bot is running","code":"CONFLICTING_STATE"}"#)
            .unwrap();
    assert_eq!(body.code, "CONFLICTING_STATE");
    assert!(body.error.starts_with("Conflict"));
}
