//! # 下游服务商
//!
//! `ProviderClient` 是中继与下游消息服务商之间的唯一接缝，调度器只依赖这个 trait。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::relay::channel::Channel;
use crate::relay::error::ProviderError;

pub mod client;
pub mod twilio;

pub use client::{BaseClient, ClientConfig, RetryConfig, TimeoutConfig};
pub use twilio::TwilioClient;

/// 解密后的服务商凭据，只在一次请求内存活
#[derive(Clone)]
pub struct ProviderCredential {
    pub account_sid: String,
    pub auth_token: String,
}

impl std::fmt::Debug for ProviderCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredential")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"<redacted>")
            .finish()
    }
}

/// 一次出站请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel: Channel,
    pub to: String,
    pub from: String,
    pub body: Option<String>,
    pub media_urls: Vec<String>,
    pub status_callback: Option<String>,
    /// 语音呼叫的内联 TwiML
    pub twiml: Option<String>,
    /// 语音呼叫的 TwiML 地址
    pub url: Option<String>,
}

/// 服务商受理回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
    pub status: String,
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// 发送一次请求；4xx 映射为 `Rejected`，超时映射为 `Timeout`，其余失败映射为 `Unavailable`
    async fn send(
        &self,
        credential: &ProviderCredential,
        message: &OutboundMessage,
    ) -> Result<ProviderReceipt, ProviderError>;

    fn client_name(&self) -> &'static str;
}
