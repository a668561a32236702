mod common;

use std::time::Duration;

use relay_gateway::dao::provider_account::set_provider_account_active;
use relay_gateway::dao::routing_rule::set_routing_rule_active;
use relay_gateway::relay::error::{RelayError, RoutingError};
use relay_gateway::relay::RoutingResolver;

use common::{seed_account, setup_pool, test_vault};

#[tokio::test]
async fn test_resolve_by_priority_and_tie_break() {
    let pool = setup_pool().await;
    let vault = test_vault();
    seed_account(&pool, &vault, "AC_us", "tok-us", Some("+15550000001")).await;
    seed_account(&pool, &vault, "AC_nyc", "tok-nyc", Some("+12120000001")).await;
    seed_account(&pool, &vault, "AC_other", "tok-other", None).await;

    let router = RoutingResolver::new(pool.clone(), Duration::from_secs(30));
    router.create_rule(10, r"\+1", "AC_us", "North America").await.unwrap();
    router.create_rule(50, r"\+1212", "AC_nyc", "New York").await.unwrap();
    router.create_rule(50, r"\+1", "AC_other", "Same priority, later id").await.unwrap();

    println!("=== Resolving destinations ===");
    let nyc = router.resolve("+12125550100", None).await.unwrap();
    assert_eq!(nyc.sid, "AC_nyc");

    // 50 优先级的两条规则中只有后建的匹配 +1555，因此选中它
    let other = router.resolve("+15551234567", None).await.unwrap();
    assert_eq!(other.sid, "AC_other");
    println!("✅ Priority and id tie-break applied");
}

#[tokio::test]
async fn test_no_match() {
    let pool = setup_pool().await;
    let vault = test_vault();
    seed_account(&pool, &vault, "AC_us", "tok", None).await;

    let router = RoutingResolver::new(pool.clone(), Duration::from_secs(30));
    router.create_rule(10, r"\+1", "AC_us", "").await.unwrap();

    let err = router.resolve("+447700900000", None).await.unwrap_err();
    assert_eq!(
        err,
        RelayError::Routing(RoutingError::NoMatch {
            destination: "+447700900000".to_string()
        })
    );
    assert_eq!(err.status_code(), 503);
}

#[tokio::test]
async fn test_invalid_pattern_rejected_at_creation_and_load() {
    let pool = setup_pool().await;
    let vault = test_vault();
    seed_account(&pool, &vault, "AC_us", "tok", None).await;

    let router = RoutingResolver::new(pool.clone(), Duration::from_secs(30));
    let err = router.create_rule(10, r"(\+1", "AC_us", "").await.unwrap_err();
    assert_eq!(err.kind(), "invalid_pattern");

    // 绕过校验直接写入的非法规则会让整个规则集加载失败
    router.create_rule(10, r"\+1", "AC_us", "").await.unwrap();
    sqlx::query("INSERT INTO routing_rules (priority, pattern, account_sid, is_active) VALUES (1, '[+44', 'AC_us', 1)")
        .execute(&pool)
        .await
        .unwrap();
    router.invalidate().await;

    let err = router.resolve("+15551234567", None).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_pattern");
    assert_eq!(err.status_code(), 500);
}

#[tokio::test]
async fn test_inactive_rules_and_accounts_are_skipped() {
    let pool = setup_pool().await;
    let vault = test_vault();
    seed_account(&pool, &vault, "AC_primary", "tok", None).await;
    seed_account(&pool, &vault, "AC_backup", "tok", None).await;

    let router = RoutingResolver::new(pool.clone(), Duration::from_secs(30));
    let primary = router.create_rule(100, r"\+44", "AC_primary", "").await.unwrap();
    router.create_rule(1, r"\+44", "AC_backup", "").await.unwrap();

    assert_eq!(router.resolve("+447700900000", None).await.unwrap().sid, "AC_primary");

    set_provider_account_active(&pool, "AC_primary", false).await.unwrap();
    router.invalidate().await;
    assert_eq!(router.resolve("+447700900000", None).await.unwrap().sid, "AC_backup");

    set_provider_account_active(&pool, "AC_primary", true).await.unwrap();
    set_routing_rule_active(&pool, primary, false).await.unwrap();
    router.invalidate().await;
    assert_eq!(router.resolve("+447700900000", None).await.unwrap().sid, "AC_backup");
}

#[tokio::test]
async fn test_cached_rules_expire_after_ttl() {
    let pool = setup_pool().await;
    let vault = test_vault();
    seed_account(&pool, &vault, "AC_us", "tok", None).await;

    let router = RoutingResolver::new(pool.clone(), Duration::from_millis(100));
    assert!(router.resolve("+15551234567", None).await.is_err());

    // 直接写库，不经过 create_rule 的失效逻辑
    sqlx::query("INSERT INTO routing_rules (priority, pattern, account_sid, is_active) VALUES (1, '\\+1', 'AC_us', 1)")
        .execute(&pool)
        .await
        .unwrap();
    assert!(router.resolve("+15551234567", None).await.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(router.resolve("+15551234567", None).await.unwrap().sid, "AC_us");
}

#[tokio::test]
async fn test_forced_account_bypasses_rules() {
    let pool = setup_pool().await;
    let vault = test_vault();
    seed_account(&pool, &vault, "AC_rules", "tok", None).await;
    seed_account(&pool, &vault, "AC_forced", "tok", None).await;

    let router = RoutingResolver::new(pool.clone(), Duration::from_secs(30));
    router.create_rule(10, r"\+1", "AC_rules", "").await.unwrap();

    assert_eq!(router.resolve("+15551234567", Some("AC_forced")).await.unwrap().sid, "AC_forced");
    // 强制账户甚至可以发往没有规则的号码
    assert_eq!(router.resolve("+81312345678", Some("AC_forced")).await.unwrap().sid, "AC_forced");

    set_provider_account_active(&pool, "AC_forced", false).await.unwrap();
    assert_eq!(router.resolve("+15551234567", Some("AC_forced")).await.unwrap().sid, "AC_rules");
}

#[tokio::test]
async fn test_cached_rule_with_deactivated_account_falls_through() {
    let pool = setup_pool().await;
    let vault = test_vault();
    seed_account(&pool, &vault, "AC_primary", "tok", None).await;
    seed_account(&pool, &vault, "AC_backup", "tok", None).await;

    let router = RoutingResolver::new(pool.clone(), Duration::from_secs(300));
    router.create_rule(100, r"\+44", "AC_primary", "").await.unwrap();
    router.create_rule(1, r"\+44", "AC_backup", "").await.unwrap();
    assert_eq!(router.resolve("+447700900000", None).await.unwrap().sid, "AC_primary");

    // 不调用 invalidate，缓存中的规则仍指向已停用的账户
    set_provider_account_active(&pool, "AC_primary", false).await.unwrap();
    assert_eq!(router.resolve("+447700900000", None).await.unwrap().sid, "AC_backup");
}
