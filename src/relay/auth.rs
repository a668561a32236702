use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::dao::api_key::{find_api_key_with_client_by_hash, get_api_key_by_id, hash_api_key, set_api_key_active};
use crate::dao::cache::CacheService;
use crate::dao::client::set_client_active;
use crate::relay::channel::Channel;
use crate::relay::error::{AuthError, DependencyError, RelayError};

/// 鉴权通过后的调用方身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub client_id: String,
    pub client_name: String,
    pub api_key_id: String,
    pub key_prefix: String,
    pub allow_sms: bool,
    pub allow_whatsapp: bool,
    pub allow_voice: bool,
    pub forced_account_sid: Option<String>,
}

impl ClientIdentity {
    /// 该 key 是否允许使用指定渠道
    pub fn allows(&self, channel: Channel) -> bool {
        match channel {
            Channel::Sms => self.allow_sms,
            Channel::WhatsApp => self.allow_whatsapp,
            Channel::Voice => self.allow_voice,
        }
    }
}

/// 鉴权网关：原始 key 的 SHA-256 摘要作为缓存键，读穿缓存到持久化 key 注册表
///
/// 只缓存成功结果。吊销在本进程内立即生效（写路径会失效缓存）；
/// 对于其他进程或绕过本网关直接修改数据库的情况，吊销最迟在一个 TTL 内生效。
/// 这是有意接受的最终一致性：TTL 越短，数据库读取越多。
#[derive(Clone)]
pub struct AuthenticationGateway {
    pool: SqlitePool,
    cache: CacheService<String, ClientIdentity>,
}

impl AuthenticationGateway {
    pub fn new(pool: SqlitePool, ttl: Duration, max_capacity: u64) -> Self {
        Self {
            pool,
            cache: CacheService::new(ttl, max_capacity),
        }
    }

    /// 校验调用方提供的原始 key，返回其身份
    pub async fn authenticate(&self, raw_key: Option<&str>) -> Result<ClientIdentity, RelayError> {
        let raw_key = match raw_key.map(str::trim) {
            Some(key) if !key.is_empty() => key,
            _ => return Err(AuthError::MissingHeader.into()),
        };

        let digest = hash_api_key(raw_key);

        if let Some(identity) = self.cache.get(&digest).await {
            debug!(client_id = %identity.client_id, key_prefix = %identity.key_prefix, "Auth cache hit");
            return Ok(identity);
        }

        let pool = self.pool.clone();
        self.cache
            .try_get_or_load(digest, |digest| async move { load_identity(&pool, &digest).await })
            .await
            .map_err(|e| (*e).clone())
    }

    /// 吊销 API Key，并立即失效其缓存条目
    pub async fn revoke_key(&self, api_key_id: &str) -> Result<bool, RelayError> {
        let Some(api_key) = get_api_key_by_id(&self.pool, api_key_id).await? else {
            return Ok(false);
        };

        let rows = set_api_key_active(&self.pool, api_key_id, false).await?;
        self.cache.invalidate(&api_key.key_hash).await;

        info!(api_key_id = %api_key_id, key_prefix = %api_key.prefix, "API key revoked");
        Ok(rows > 0)
    }

    /// 停用客户；其所有 key 的缓存结果一并失效
    pub async fn deactivate_client(&self, client_id: &str) -> Result<bool, RelayError> {
        let rows = set_client_active(&self.pool, client_id, false).await?;
        self.cache.invalidate_all();

        info!(client_id = %client_id, "Client deactivated, auth cache cleared");
        Ok(rows > 0)
    }
}

async fn load_identity(pool: &SqlitePool, digest: &str) -> Result<ClientIdentity, RelayError> {
    let record = find_api_key_with_client_by_hash(pool, digest)
        .await
        .map_err(DependencyError::from)?;

    let Some(record) = record else {
        warn!("Authentication failed: unknown API key");
        return Err(AuthError::InvalidKey.into());
    };

    if !record.key_active || !record.client_active {
        warn!(
            api_key_id = %record.api_key_id,
            key_active = record.key_active,
            client_active = record.client_active,
            "Authentication failed: inactive API key or client"
        );
        return Err(AuthError::InvalidKey.into());
    }

    debug!(client_id = %record.client_id, key_prefix = %record.prefix, "Loaded API key from registry");

    Ok(ClientIdentity {
        client_id: record.client_id,
        client_name: record.client_name,
        api_key_id: record.api_key_id,
        key_prefix: record.prefix,
        allow_sms: record.allow_sms,
        allow_whatsapp: record.allow_whatsapp,
        allow_voice: record.allow_voice,
        forced_account_sid: record.forced_account_sid,
    })
}
