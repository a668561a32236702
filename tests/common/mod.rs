#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use relay_gateway::dao::api_key::{generate_api_key, ApiKey};
use relay_gateway::dao::client::{create_client, Client};
use relay_gateway::dao::provider_account::create_provider_account_from_raw_token;
use relay_gateway::dao::{init_db, init_sqlite_pool_with_busy_timeout};
use relay_gateway::relay::error::ProviderError;
use relay_gateway::relay::money::to_units;
use relay_gateway::relay::provider::{OutboundMessage, ProviderClient, ProviderCredential, ProviderReceipt};
use relay_gateway::relay::CredentialVault;

pub const TEST_MASTER_KEY: [u8; 32] = [7u8; 32];

/// 每个测试一个独立的临时数据库文件
pub async fn setup_pool() -> SqlitePool {
    setup_pool_with_busy_timeout(Duration::from_secs(5)).await
}

pub async fn setup_pool_with_busy_timeout(busy_timeout: Duration) -> SqlitePool {
    let path = std::env::temp_dir().join(format!("relay-test-{}.db", uuid::Uuid::new_v4()));
    let url = format!("sqlite://{}", path.display());
    let pool = init_sqlite_pool_with_busy_timeout(&url, 8, busy_timeout)
        .await
        .expect("pool init failed");
    init_db(&pool).await.expect("schema init failed");
    pool
}

pub fn test_vault() -> CredentialVault {
    CredentialVault::new(&TEST_MASTER_KEY)
}

pub async fn seed_client(pool: &SqlitePool, balance: Decimal) -> String {
    let client = Client {
        id: uuid::Uuid::new_v4().to_string(),
        name: "Acme Messaging".to_string(),
        balance_units: to_units(balance).expect("balance out of range"),
        is_active: true,
        created_at: None,
        updated_at: None,
    };
    create_client(pool, &client).await.expect("create_client failed");
    client.id
}

pub async fn seed_api_key(pool: &SqlitePool, client_id: &str, forced_account_sid: Option<&str>) -> (ApiKey, String) {
    generate_api_key(pool, client_id, forced_account_sid.map(str::to_string))
        .await
        .expect("generate_api_key failed")
}

pub async fn seed_account(pool: &SqlitePool, vault: &CredentialVault, sid: &str, token: &str, phone_number: Option<&str>) {
    create_provider_account_from_raw_token(pool, vault, sid, token, sid, phone_number.map(str::to_string))
        .await
        .expect("create provider account failed");
}

#[derive(Debug, Clone)]
pub enum FakeBehavior {
    Accept,
    Reject,
    Timeout,
    Unavailable,
}

/// 记录调用并按预设行为应答的服务商
pub struct FakeProvider {
    behavior: Mutex<FakeBehavior>,
    counter: AtomicUsize,
    pub calls: Mutex<Vec<(ProviderCredential, OutboundMessage)>>,
}

impl FakeProvider {
    pub fn new(behavior: FakeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            counter: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn set_behavior(&self, behavior: FakeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<(ProviderCredential, OutboundMessage)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ProviderClient for FakeProvider {
    async fn send(
        &self,
        credential: &ProviderCredential,
        message: &OutboundMessage,
    ) -> Result<ProviderReceipt, ProviderError> {
        self.calls.lock().unwrap().push((credential.clone(), message.clone()));
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            FakeBehavior::Accept => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                Ok(ProviderReceipt {
                    provider_message_id: format!("SM{:032}", n),
                    status: "queued".to_string(),
                })
            }
            FakeBehavior::Reject => Err(ProviderError::Rejected {
                status: 400,
                code: Some(21211),
                message: "The 'To' number is not a valid phone number.".to_string(),
            }),
            FakeBehavior::Timeout => Err(ProviderError::Timeout { timeout_ms: 50 }),
            FakeBehavior::Unavailable => Err(ProviderError::Unavailable("connection refused".to_string())),
        }
    }

    fn client_name(&self) -> &'static str {
        "fake"
    }
}
