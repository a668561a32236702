//! # 中继网关运维工具
//!
//! 客户、API Key、服务商账户、路由规则的日常维护，以及主密钥轮换。

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::time::Duration;

use relay_gateway::config::RelayConfig;
use relay_gateway::dao::api_key::generate_api_key;
use relay_gateway::dao::client::{create_client, Client};
use relay_gateway::dao::provider_account::{create_provider_account_from_raw_token, rotate_provider_tokens};
use relay_gateway::dao::routing_rule::list_active_routing_rules;
use relay_gateway::dao::{init_db, init_sqlite_pool};
use relay_gateway::relay::money::to_units;
use relay_gateway::relay::{AuthenticationGateway, BillingLedger, CredentialVault, RoutingResolver};

#[derive(Parser)]
#[command(name = "relay_admin", about = "Relay gateway maintenance commands")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 创建客户
    CreateClient {
        name: String,
        #[arg(long, default_value = "0")]
        balance: Decimal,
    },
    /// 为客户生成 API Key（明文只显示一次）
    CreateKey {
        client_id: String,
        #[arg(long)]
        forced_account: Option<String>,
    },
    /// 充值
    AddFunds { client_id: String, amount: Decimal },
    /// 吊销 API Key
    RevokeKey { api_key_id: String },
    /// 添加服务商账户，令牌加密后入库
    AddAccount {
        sid: String,
        token: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone_number: Option<String>,
    },
    /// 添加路由规则
    AddRule {
        pattern: String,
        account_sid: String,
        #[arg(long, default_value_t = 0)]
        priority: i64,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// 列出生效中的路由规则
    ListRules,
    /// 校验一个原始 API Key
    VerifyKey { key: String },
    /// 生成新的主密钥
    GenerateMasterKey,
    /// 用新主密钥重新加密全部服务商令牌
    RotateMasterKey { new_key: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::GenerateMasterKey = cli.command {
        println!("{}", CredentialVault::generate_master_key());
        return Ok(());
    }

    let config = RelayConfig::from_env()?;
    let pool = init_sqlite_pool(&config.database_url, 1).await?;
    init_db(&pool).await?;
    let vault = CredentialVault::from_base64(&config.master_key)?;

    match cli.command {
        Command::CreateClient { name, balance } => {
            let client = Client {
                id: uuid::Uuid::new_v4().to_string(),
                name,
                balance_units: to_units(balance).context("Balance out of range")?,
                is_active: true,
                created_at: None,
                updated_at: None,
            };
            create_client(&pool, &client).await?;
            println!("✅ Client created: {} ({})", client.id, client.name);
        }
        Command::CreateKey { client_id, forced_account } => {
            let (api_key, raw_key) = generate_api_key(&pool, &client_id, forced_account).await?;
            println!("✅ API key {} created (prefix {})", api_key.id, api_key.prefix);
            println!("KEY: {}", raw_key);
        }
        Command::AddFunds { client_id, amount } => {
            let ledger = BillingLedger::new(pool.clone(), config.ledger.clone());
            let balance = ledger.credit(&client_id, amount).await?;
            println!("✅ Funds added, new balance: {}", balance);
        }
        Command::RevokeKey { api_key_id } => {
            let auth = AuthenticationGateway::new(pool.clone(), config.auth_cache_ttl, config.auth_cache_capacity);
            if !auth.revoke_key(&api_key_id).await? {
                bail!("API key {} not found", api_key_id);
            }
            println!("✅ API key {} revoked", api_key_id);
        }
        Command::AddAccount { sid, token, name, phone_number } => {
            let name = name.unwrap_or_else(|| sid.clone());
            create_provider_account_from_raw_token(&pool, &vault, &sid, &token, &name, phone_number).await?;
            println!("✅ Provider account {} stored", sid);
        }
        Command::AddRule { pattern, account_sid, priority, description } => {
            let router = RoutingResolver::new(pool.clone(), Duration::ZERO);
            let rule_id = router.create_rule(priority, &pattern, &account_sid, &description).await?;
            println!("✅ Rule {} created: {} -> {} (priority {})", rule_id, pattern, account_sid, priority);
        }
        Command::ListRules => {
            let rules = list_active_routing_rules(&pool).await?;
            if rules.is_empty() {
                println!("No active routing rules");
            }
            for rule in rules {
                println!(
                    "#{:<4} priority {:<5} {} -> {} {}",
                    rule.id, rule.priority, rule.pattern, rule.account_sid, rule.description
                );
            }
        }
        Command::VerifyKey { key } => {
            let auth = AuthenticationGateway::new(pool.clone(), config.auth_cache_ttl, config.auth_cache_capacity);
            match auth.authenticate(Some(&key)).await {
                Ok(identity) => println!(
                    "✅ Key valid: id {}, client {}, prefix {}",
                    identity.api_key_id, identity.client_id, identity.key_prefix
                ),
                Err(e) => println!("❌ Key rejected: {}", e),
            }
        }
        Command::RotateMasterKey { new_key } => {
            let new_vault = CredentialVault::from_base64(&new_key)?;
            let rotated = rotate_provider_tokens(&pool, &vault, &new_vault).await?;
            println!("✅ Re-encrypted {} provider tokens; set MASTER_ENCRYPTION_KEY to the new key", rotated);
        }
        Command::GenerateMasterKey => {}
    }

    pool.close().await;
    Ok(())
}
