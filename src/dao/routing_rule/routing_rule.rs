use serde::{Deserialize, Serialize};
use sqlx::{Result, SqlitePool};

/// 路由规则：目的号码正则 + 优先级 + 目标账户
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: i64,
    pub priority: i64,
    pub pattern: String,
    pub account_sid: String,
    pub description: String,
    pub is_active: bool,
    pub created_at: Option<String>,
}

/// Create a new routing rule, returning its id (async)
pub async fn create_routing_rule(
    pool: &SqlitePool,
    priority: i64,
    pattern: &str,
    account_sid: &str,
    description: &str,
) -> Result<i64> {
    let res = sqlx::query(r#"
        INSERT INTO routing_rules (priority, pattern, account_sid, description, is_active, created_at)
        VALUES (?, ?, ?, ?, 1, datetime('now'))
    "#)
        .bind(priority)
        .bind(pattern)
        .bind(account_sid)
        .bind(description)
        .execute(pool)
        .await?;
    Ok(res.last_insert_rowid())
}

/// Read a routing rule by id (async)
pub async fn get_routing_rule_by_id(pool: &SqlitePool, id: i64) -> Result<Option<RoutingRule>> {
    let rule = sqlx::query_as::<_, RoutingRule>("SELECT * FROM routing_rules WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(rule)
}

/// List active rules whose account is also active, in evaluation order (async)
///
/// Highest priority first; equal priorities ordered by ascending id.
pub async fn list_active_routing_rules(pool: &SqlitePool) -> Result<Vec<RoutingRule>> {
    let rules = sqlx::query_as::<_, RoutingRule>(r#"
        SELECT r.* FROM routing_rules r
        JOIN provider_accounts a ON a.sid = r.account_sid
        WHERE r.is_active = 1 AND a.is_active = 1
        ORDER BY r.priority DESC, r.id ASC
    "#)
        .fetch_all(pool)
        .await?;
    Ok(rules)
}

/// Toggle active status of a routing rule (async)
pub async fn set_routing_rule_active(pool: &SqlitePool, id: i64, is_active: bool) -> Result<u64> {
    let res = sqlx::query("UPDATE routing_rules SET is_active = ? WHERE id = ?")
        .bind(is_active)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}
