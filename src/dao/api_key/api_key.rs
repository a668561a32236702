use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{Result, SqlitePool};

const PREFIX_LEN: usize = 8;

/// 客户端 API Key；只保存 SHA-256 哈希和用于识别的前缀，从不保存原始密钥
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub client_id: String,
    pub key_hash: String,
    pub prefix: String,
    pub allow_sms: bool,
    pub allow_whatsapp: bool,
    pub allow_voice: bool,
    pub forced_account_sid: Option<String>,
    pub is_active: bool,
    pub created_at: Option<String>,
}

/// 鉴权查询结果：key 与其所属客户的联合视图
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyWithClient {
    pub api_key_id: String,
    pub client_id: String,
    pub client_name: String,
    pub prefix: String,
    pub allow_sms: bool,
    pub allow_whatsapp: bool,
    pub allow_voice: bool,
    pub forced_account_sid: Option<String>,
    pub key_active: bool,
    pub client_active: bool,
}

/// 从原始API密钥生成SHA-256哈希（十六进制）
pub fn hash_api_key(raw_key: &str) -> String {
    let mut hasher = Sha256::default();
    hasher.update(raw_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Create a new API key entry (async)
pub async fn create_api_key(pool: &SqlitePool, api_key: &ApiKey) -> Result<u64> {
    let res = sqlx::query(r#"
        INSERT INTO api_keys (
            id, client_id, key_hash, prefix, allow_sms, allow_whatsapp, allow_voice,
            forced_account_sid, is_active, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
    "#)
        .bind(&api_key.id)
        .bind(&api_key.client_id)
        .bind(&api_key.key_hash)
        .bind(&api_key.prefix)
        .bind(api_key.allow_sms)
        .bind(api_key.allow_whatsapp)
        .bind(api_key.allow_voice)
        .bind(&api_key.forced_account_sid)
        .bind(api_key.is_active)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Generate a new random API key for a client (async)
///
/// Returns the stored entry and the plain key. The plain key is only
/// available here and cannot be recovered later.
pub async fn generate_api_key(
    pool: &SqlitePool,
    client_id: &str,
    forced_account_sid: Option<String>,
) -> Result<(ApiKey, String)> {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    let plain_key = general_purpose::URL_SAFE_NO_PAD.encode(secret);

    let api_key = ApiKey {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client_id.to_string(),
        key_hash: hash_api_key(&plain_key),
        prefix: plain_key[..PREFIX_LEN].to_string(),
        allow_sms: true,
        allow_whatsapp: true,
        allow_voice: true,
        forced_account_sid,
        is_active: true,
        created_at: None,
    };

    create_api_key(pool, &api_key).await?;
    Ok((api_key, plain_key))
}

/// Read an API key entry by id (async)
pub async fn get_api_key_by_id(pool: &SqlitePool, id: &str) -> Result<Option<ApiKey>> {
    let api_key = sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(api_key)
}

/// Look up an API key and its owning client by key hash (async)
pub async fn find_api_key_with_client_by_hash(pool: &SqlitePool, key_hash: &str) -> Result<Option<ApiKeyWithClient>> {
    let record = sqlx::query_as::<_, ApiKeyWithClient>(r#"
        SELECT
            k.id AS api_key_id,
            k.client_id AS client_id,
            c.name AS client_name,
            k.prefix AS prefix,
            k.allow_sms AS allow_sms,
            k.allow_whatsapp AS allow_whatsapp,
            k.allow_voice AS allow_voice,
            k.forced_account_sid AS forced_account_sid,
            k.is_active AS key_active,
            c.is_active AS client_active
        FROM api_keys k
        JOIN clients c ON c.id = k.client_id
        WHERE k.key_hash = ?
    "#)
        .bind(key_hash)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// Toggle active status of an API key (async)
pub async fn set_api_key_active(pool: &SqlitePool, id: &str, is_active: bool) -> Result<u64> {
    let res = sqlx::query("UPDATE api_keys SET is_active = ? WHERE id = ?")
        .bind(is_active)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_hash_generation() {
        let hash1 = hash_api_key("sk-1234567890abcdef");
        let hash2 = hash_api_key("sk-1234567890abcdef");

        // 相同输入应该产生相同哈希
        assert_eq!(hash1, hash2);
        // 哈希应该是64个字符(SHA-256的十六进制表示)
        assert_eq!(hash1.len(), 64);
        assert_ne!(hash1, hash_api_key("different-key"));
    }
}
