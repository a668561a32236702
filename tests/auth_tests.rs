mod common;

use rust_decimal_macros::dec;
use std::time::Duration;

use relay_gateway::dao::api_key::set_api_key_active;
use relay_gateway::relay::channel::Channel;
use relay_gateway::relay::error::{AuthError, RelayError};
use relay_gateway::relay::AuthenticationGateway;

use common::{seed_api_key, seed_client, setup_pool};

#[tokio::test]
async fn test_authenticate_valid_key() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(5)).await;
    let (api_key, raw_key) = seed_api_key(&pool, &client_id, None).await;
    let auth = AuthenticationGateway::new(pool.clone(), Duration::from_secs(300), 100);

    let identity = auth.authenticate(Some(&raw_key)).await.unwrap();
    assert_eq!(identity.client_id, client_id);
    assert_eq!(identity.api_key_id, api_key.id);
    assert_eq!(identity.key_prefix, api_key.prefix);
    assert!(identity.allows(Channel::Sms));
    assert!(identity.forced_account_sid.is_none());

    // 首尾空白不影响
    let again = auth.authenticate(Some(&format!("  {}  ", raw_key))).await.unwrap();
    assert_eq!(again, identity);
    println!("✅ Authenticated key with prefix {}", identity.key_prefix);
}

#[tokio::test]
async fn test_missing_and_unknown_keys() {
    let pool = setup_pool().await;
    let auth = AuthenticationGateway::new(pool.clone(), Duration::from_secs(300), 100);

    assert_eq!(
        auth.authenticate(None).await.unwrap_err(),
        RelayError::Auth(AuthError::MissingHeader)
    );
    assert_eq!(
        auth.authenticate(Some("   ")).await.unwrap_err(),
        RelayError::Auth(AuthError::MissingHeader)
    );
    assert_eq!(
        auth.authenticate(Some("not-a-real-key")).await.unwrap_err(),
        RelayError::Auth(AuthError::InvalidKey)
    );
}

#[tokio::test]
async fn test_failed_lookups_are_not_cached() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(5)).await;
    let (api_key, raw_key) = seed_api_key(&pool, &client_id, None).await;
    set_api_key_active(&pool, &api_key.id, false).await.unwrap();

    let auth = AuthenticationGateway::new(pool.clone(), Duration::from_secs(300), 100);
    assert!(auth.authenticate(Some(&raw_key)).await.is_err());

    // 重新启用后立即可用，说明失败结果没有被缓存
    set_api_key_active(&pool, &api_key.id, true).await.unwrap();
    assert!(auth.authenticate(Some(&raw_key)).await.is_ok());
}

#[tokio::test]
async fn test_revoke_key_takes_effect_immediately() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(5)).await;
    let (api_key, raw_key) = seed_api_key(&pool, &client_id, None).await;
    let auth = AuthenticationGateway::new(pool.clone(), Duration::from_secs(300), 100);

    auth.authenticate(Some(&raw_key)).await.unwrap();
    assert!(auth.revoke_key(&api_key.id).await.unwrap());

    assert_eq!(
        auth.authenticate(Some(&raw_key)).await.unwrap_err(),
        RelayError::Auth(AuthError::InvalidKey)
    );
    assert!(!auth.revoke_key("unknown-id").await.unwrap());
}

#[tokio::test]
async fn test_out_of_band_revocation_bounded_by_ttl() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(5)).await;
    let (api_key, raw_key) = seed_api_key(&pool, &client_id, None).await;
    let auth = AuthenticationGateway::new(pool.clone(), Duration::from_millis(200), 100);

    auth.authenticate(Some(&raw_key)).await.unwrap();

    // 绕过网关直接改库：缓存仍然有效，直到 TTL 过期
    set_api_key_active(&pool, &api_key.id, false).await.unwrap();
    assert!(auth.authenticate(Some(&raw_key)).await.is_ok());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        auth.authenticate(Some(&raw_key)).await.unwrap_err(),
        RelayError::Auth(AuthError::InvalidKey)
    );
    println!("✅ Revocation observed after TTL");
}

#[tokio::test]
async fn test_deactivated_client_is_rejected() {
    let pool = setup_pool().await;
    let client_id = seed_client(&pool, dec!(5)).await;
    let (_api_key, raw_key) = seed_api_key(&pool, &client_id, None).await;
    let auth = AuthenticationGateway::new(pool.clone(), Duration::from_secs(300), 100);

    auth.authenticate(Some(&raw_key)).await.unwrap();
    assert!(auth.deactivate_client(&client_id).await.unwrap());
    assert!(auth.authenticate(Some(&raw_key)).await.is_err());
}

#[tokio::test]
async fn test_store_outage_fails_closed() {
    let pool = setup_pool().await;
    let auth = AuthenticationGateway::new(pool.clone(), Duration::from_secs(300), 100);
    pool.close().await;

    let err = auth.authenticate(Some("any-key")).await.unwrap_err();
    assert_eq!(err.kind(), "store_unavailable");
    assert_eq!(err.status_code(), 503);
}
