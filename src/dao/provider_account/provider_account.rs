use serde::{Deserialize, Serialize};
use sqlx::{Result, SqlitePool};

use crate::relay::vault::CredentialVault;

/// 服务商子账户；令牌以主密钥加密后保存，可被多个客户的流量共用
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub sid: String,
    #[serde(skip_serializing)]
    pub encrypted_token: String,
    pub name: String,
    pub phone_number: Option<String>,
    pub is_active: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// Create a new provider account entry (async)
pub async fn create_provider_account(pool: &SqlitePool, account: &ProviderAccount) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO provider_accounts (
            sid, encrypted_token, name, phone_number, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, datetime('now'), datetime('now'))
    "#)
        .bind(&account.sid)
        .bind(&account.encrypted_token)
        .bind(&account.name)
        .bind(&account.phone_number)
        .bind(account.is_active)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Create a new provider account from a raw auth token (async)
/// The token is encrypted with the vault's master key before it is stored.
pub async fn create_provider_account_from_raw_token(
    pool: &SqlitePool,
    vault: &CredentialVault,
    sid: &str,
    raw_token: &str,
    name: &str,
    phone_number: Option<String>,
) -> Result<u64> {
    let encrypted_token = vault
        .encrypt(raw_token)
        .map_err(|e| sqlx::Error::Protocol(format!("Failed to encrypt provider token: {}", e)))?;

    let account = ProviderAccount {
        sid: sid.to_string(),
        encrypted_token,
        name: name.to_string(),
        phone_number,
        is_active: true,
        created_at: None,
        updated_at: None,
    };

    create_provider_account(pool, &account).await
}

/// Read a provider account by sid (async)
pub async fn get_provider_account_by_sid(pool: &SqlitePool, sid: &str) -> Result<Option<ProviderAccount>> {
    let account = sqlx::query_as::<_, ProviderAccount>("SELECT * FROM provider_accounts WHERE sid = ?")
        .bind(sid)
        .fetch_optional(pool)
        .await?;
    Ok(account)
}

/// Read an active provider account by sid (async)
pub async fn get_active_provider_account(pool: &SqlitePool, sid: &str) -> Result<Option<ProviderAccount>> {
    let account = sqlx::query_as::<_, ProviderAccount>(
        "SELECT * FROM provider_accounts WHERE sid = ? AND is_active = 1",
    )
        .bind(sid)
        .fetch_optional(pool)
        .await?;
    Ok(account)
}

/// List all provider accounts (async)
pub async fn list_provider_accounts(pool: &SqlitePool) -> Result<Vec<ProviderAccount>> {
    let accounts = sqlx::query_as::<_, ProviderAccount>("SELECT * FROM provider_accounts ORDER BY sid")
        .fetch_all(pool)
        .await?;
    Ok(accounts)
}

/// Toggle active status of a provider account (async)
pub async fn set_provider_account_active(pool: &SqlitePool, sid: &str, is_active: bool) -> Result<u64> {
    let res = sqlx::query("UPDATE provider_accounts SET is_active = ?, updated_at = datetime('now') WHERE sid = ?")
        .bind(is_active)
        .bind(sid)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// 主密钥轮换：用旧密钥解密、新密钥重新加密全部账户令牌，在单个事务内完成
///
/// 任一条记录无法用旧密钥解密时整体回滚。返回重新加密的记录数。
pub async fn rotate_provider_tokens(
    pool: &SqlitePool,
    old_vault: &CredentialVault,
    new_vault: &CredentialVault,
) -> Result<u64> {
    let accounts = list_provider_accounts(pool).await?;
    let mut tx = pool.begin().await?;
    let mut rotated = 0;

    for account in accounts {
        let token = old_vault
            .decrypt(&account.encrypted_token)
            .map_err(|e| sqlx::Error::Protocol(format!("Failed to decrypt token for {}: {}", account.sid, e)))?;
        let encrypted_token = new_vault
            .encrypt(&token)
            .map_err(|e| sqlx::Error::Protocol(format!("Failed to encrypt token for {}: {}", account.sid, e)))?;

        rotated += sqlx::query("UPDATE provider_accounts SET encrypted_token = ?, updated_at = datetime('now') WHERE sid = ?")
            .bind(&encrypted_token)
            .bind(&account.sid)
            .execute(&mut *tx)
            .await?
            .rows_affected();
    }

    tx.commit().await?;
    Ok(rotated)
}
