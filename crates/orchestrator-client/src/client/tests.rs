//! Unit tests for client module.

use super::*;

// ============================================================================
// ClientConfig Tests
// ============================================================================

#[test]
fn test_client_config_default() {
    let config = ClientConfig::default();

    assert_eq!(config.base_url, "http://localhost:8000");
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert!(config.api_key.is_none());
}

// ============================================================================
// OrchestratorClient Creation Tests
// ============================================================================

#[test]
fn test_client_new_without_key() {
    assert!(OrchestratorClient::new(ClientConfig::default()).is_ok());
}

#[test]
fn test_client_rejects_unprintable_key() {
    let result = OrchestratorClient::new(ClientConfig {
        api_key: Some("bad\nkey".to_string()),
        ..Default::default()
    });

    assert!(matches!(result, Err(Error::InvalidRequest(_))));
}

#[test]
fn test_for_key_keeps_base_url() {
    let client = OrchestratorClient::with_api_key("http://localhost:8000/", "tbo_one").unwrap();
    let other = client.for_key("tbo_two").unwrap();

    assert_eq!(other.base_url, "http://localhost:8000");
    assert_eq!(other.api_key.as_deref(), Some("tbo_two"));
}

// ============================================================================
// URL Tests
// ============================================================================

#[test]
fn test_logs_ws_url_http() {
    let client = OrchestratorClient::with_api_key("http://localhost:8000", "k").unwrap();
    let url = client.logs_ws_url("ft-acme-main", Some(50)).unwrap();

    assert_eq!(
        url.as_str(),
        "ws://localhost:8000/api/v1/bots/ft-acme-main/logs/ws?tail=50"
    );
}

#[test]
fn test_logs_ws_url_https() {
    let client = OrchestratorClient::with_api_key("https://api.example.com/", "k").unwrap();
    let url = client.logs_ws_url("ft-acme-main", None).unwrap();

    assert_eq!(
        url.as_str(),
        "wss://api.example.com/api/v1/bots/ft-acme-main/logs/ws"
    );
}

#[test]
fn test_with_query() {
    assert_eq!(
        with_query("http://h/logs".to_string(), &TailQuery { tail: Some(5) }).unwrap(),
        "http://h/logs?tail=5"
    );
    assert_eq!(
        with_query("http://h/logs".to_string(), &TailQuery { tail: None }).unwrap(),
        "http://h/logs"
    );
}
