//! Health check and authentication boundary tests.

use orchestrator_tests::{ACME_READ_KEY, TestServer};

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::spawn().await;

    let health = server
        .anonymous()
        .health_check()
        .await
        .expect("Health check failed");

    assert_eq!(health.status, "healthy");
    assert_eq!(health.runtime, "memory");
    assert!(!health.version.is_empty());
}

#[tokio::test]
async fn test_health_reports_degraded_runtime() {
    let server = TestServer::spawn().await;
    server.runtime.set_available(false);

    let health = server
        .anonymous()
        .health_check()
        .await
        .expect("Health check failed");

    assert_eq!(health.status, "degraded");
}

#[tokio::test]
async fn test_missing_key_is_rejected() {
    let server = TestServer::spawn().await;

    let err = server
        .anonymous()
        .list_bots(&Default::default())
        .await
        .expect_err("anonymous request should fail");

    assert_eq!(err.status(), Some(401));
    assert_eq!(err.code(), Some("UNAUTHORIZED"));
}

#[tokio::test]
async fn test_unknown_key_is_rejected() {
    let server = TestServer::spawn().await;

    let err = server
        .client("tbo_not_a_real_key_at_all")
        .list_bots(&Default::default())
        .await
        .expect_err("unknown key should fail");

    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_read_key_cannot_mint_keys() {
    let server = TestServer::spawn().await;

    let err = server
        .client(ACME_READ_KEY)
        .list_api_keys()
        .await
        .expect_err("read key should not list keys");

    assert_eq!(err.status(), Some(403));
    assert_eq!(err.code(), Some("FORBIDDEN"));
}
