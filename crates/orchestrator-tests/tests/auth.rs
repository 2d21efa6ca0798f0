//! API key management tests.

use orchestrator_client::{CreateApiKeyRequest, Permission};
use orchestrator_tests::{ACME_ADMIN_KEY, GLOBEX_MANAGE_KEY, TestServer};

#[tokio::test]
async fn test_mint_use_and_revoke_key() {
    let server = TestServer::spawn().await;
    let admin = server.client(ACME_ADMIN_KEY);

    let created = admin
        .create_api_key(&CreateApiKeyRequest {
            name: "dashboard".to_string(),
            permissions: vec![Permission::Read],
            rate_limit: Some(30),
        })
        .await
        .expect("mint key");
    assert_eq!(created.tenant_id, "acme");
    assert!(created.api_key.starts_with("tbo_"));

    let keys = admin.list_api_keys().await.expect("list keys");
    assert!(keys.keys.iter().any(|k| k.key_id == created.key_id && k.rate_limit == 30));

    let reader = admin.for_key(&created.api_key).expect("reader client");
    reader
        .list_bots(&Default::default())
        .await
        .expect("new key can read");

    admin
        .delete_api_key(&created.key_id)
        .await
        .expect("revoke key");
    let err = reader
        .list_bots(&Default::default())
        .await
        .expect_err("revoked key");
    assert_eq!(err.status(), Some(401));
}

#[tokio::test]
async fn test_revoking_unknown_key_is_not_found() {
    let server = TestServer::spawn().await;

    let err = server
        .client(ACME_ADMIN_KEY)
        .delete_api_key("no-such-key")
        .await
        .expect_err("unknown key");
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_manage_key_cannot_mint_keys() {
    let server = TestServer::spawn().await;

    let err = server
        .client(GLOBEX_MANAGE_KEY)
        .create_api_key(&CreateApiKeyRequest {
            name: "escalate".to_string(),
            permissions: vec![Permission::Admin],
            rate_limit: None,
        })
        .await
        .expect_err("manage key is not admin");
    assert_eq!(err.status(), Some(403));
}
