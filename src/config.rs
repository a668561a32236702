//! 运行配置，全部来自环境变量。

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

use crate::logger::{LogConfig, LogLevel};
use crate::relay::billing::LedgerConfig;
use crate::relay::channel::RateCard;
use crate::relay::money::to_units;
use crate::relay::provider::{ClientConfig, RetryConfig, TimeoutConfig};
use crate::relay::provider::twilio::DEFAULT_BASE_URL;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_addr: String,
    /// Base64 编码的 32 字节主密钥
    pub master_key: String,
    pub public_host: Option<String>,
    pub provider_base_url: String,
    pub provider: ClientConfig,
    pub auth_cache_ttl: Duration,
    pub auth_cache_capacity: u64,
    pub routing_cache_ttl: Duration,
    pub ledger: LedgerConfig,
    pub reservation_timeout: Duration,
    pub sweep_interval: Duration,
    pub rates: RateCard,
    pub log: LogConfig,
}

impl RelayConfig {
    /// 从环境变量读取配置；`MASTER_ENCRYPTION_KEY` 必填
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 从任意键值来源读取配置
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let master_key = get("MASTER_ENCRYPTION_KEY").context("MASTER_ENCRYPTION_KEY must be set")?;

        let defaults = RateCard::default();
        let rates = RateCard {
            sms: parse_or(&get, "RATE_SMS", defaults.sms)?,
            whatsapp: parse_or(&get, "RATE_WHATSAPP", defaults.whatsapp)?,
            voice: parse_or(&get, "RATE_VOICE", defaults.voice)?,
        };
        for (name, rate) in [("RATE_SMS", rates.sms), ("RATE_WHATSAPP", rates.whatsapp), ("RATE_VOICE", rates.voice)] {
            if rate <= Decimal::ZERO {
                anyhow::bail!("{} must be positive, got {}", name, rate);
            }
            // 按存储精度换算后必须至少为一个单位
            if !to_units(rate).is_some_and(|units| units > 0) {
                anyhow::bail!("{} must be between 0.0001 and the ledger maximum, got {}", name, rate);
            }
        }

        let provider = ClientConfig::new()
            .with_timeout(TimeoutConfig::new().with_request_timeout(Duration::from_millis(parse_or(
                &get,
                "PROVIDER_TIMEOUT_MS",
                15_000u64,
            )?)))
            .with_retry(RetryConfig::new().with_max_attempts(parse_or(&get, "PROVIDER_MAX_ATTEMPTS", 2u32)?));

        let log = LogConfig {
            level: parse_or(&get, "LOG_LEVEL", LogLevel::Info)?,
            log_dir: get("LOG_DIR").unwrap_or_else(|| "logs".to_string()),
            json_format: parse_or(&get, "LOG_JSON", false)?,
            ..Default::default()
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite://data/relay.db".to_string()),
            max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", 10u32)?,
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            master_key,
            public_host: get("PUBLIC_HOST").map(|h| h.trim_end_matches('/').to_string()),
            provider_base_url: get("PROVIDER_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            provider,
            auth_cache_ttl: Duration::from_secs(parse_or(&get, "AUTH_CACHE_TTL_SECS", 300u64)?),
            auth_cache_capacity: parse_or(&get, "AUTH_CACHE_CAPACITY", 10_000u64)?,
            routing_cache_ttl: Duration::from_secs(parse_or(&get, "ROUTING_CACHE_TTL_SECS", 30u64)?),
            ledger: LedgerConfig {
                max_attempts: parse_or(&get, "LEDGER_MAX_RETRIES", 5u32)?.max(1),
                ..Default::default()
            },
            reservation_timeout: Duration::from_secs(parse_or(&get, "RESERVATION_TIMEOUT_SECS", 600u64)?),
            sweep_interval: Duration::from_secs(parse_or(&get, "SWEEP_INTERVAL_SECS", 60u64)?.max(1)),
            rates,
            log,
        })
    }
}

fn parse_or<T, G>(get: &G, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", name, raw, e)),
        None => Ok(default),
    }
}
