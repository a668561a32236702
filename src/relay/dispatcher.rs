//! # 请求调度
//!
//! 每个发送请求的状态机：
//! `Authenticated → Reserved → Routed → Decrypted → Dispatched → {Committed | RolledBack}`
//!
//! 先预留资金再调用服务商；预留之后的任何失败都会释放预留金额。
//! 没有预留就不会有出站请求，出站失败也不会留下扣费。

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dao::provider_account::ProviderAccount;
use crate::relay::auth::ClientIdentity;
use crate::relay::billing::{BillingLedger, CommitDetails, ReservationDetails, ReservationToken};
use crate::relay::channel::{Channel, RateCard};
use crate::relay::error::{DependencyError, RelayError};
use crate::relay::money::from_units;
use crate::relay::provider::{OutboundMessage, ProviderClient, ProviderCredential};
use crate::relay::routing::RoutingResolver;
use crate::relay::vault::CredentialVault;

const WHATSAPP_PREFIX: &str = "whatsapp:";
pub const WEBHOOK_PATH: &str = "/relay/twilio/webhook";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStage {
    Authenticated,
    Reserved,
    Routed,
    Decrypted,
    Dispatched,
    Committed,
    RolledBack,
}

/// 调用方提交的发送请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    pub to: String,
    pub from: Option<String>,
    pub body: Option<String>,
    pub media_urls: Vec<String>,
    pub status_callback: Option<String>,
    pub twiml: Option<String>,
    pub url: Option<String>,
}

impl SendRequest {
    fn validate(&self, channel: Channel) -> Result<(), RelayError> {
        if self.to.trim().is_empty() {
            return Err(RelayError::InvalidRequest("'to' is required".to_string()));
        }
        match channel {
            Channel::Voice => {
                if self.twiml.is_none() && self.url.is_none() {
                    return Err(RelayError::InvalidRequest(
                        "either 'twiml' or 'url' is required for calls".to_string(),
                    ));
                }
            }
            Channel::Sms | Channel::WhatsApp => {
                let has_body = self.body.as_deref().is_some_and(|b| !b.is_empty());
                if !has_body && self.media_urls.is_empty() {
                    return Err(RelayError::InvalidRequest(
                        "either 'body' or 'media_url' is required".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// 成功受理后的回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub transaction_id: String,
    pub provider_message_id: String,
    pub status: String,
    pub account_sid: String,
    pub cost: Decimal,
    pub balance: Decimal,
}

/// 单个请求的调度上下文
#[derive(Debug)]
struct DispatchContext {
    request_id: String,
    client_id: String,
    channel: Channel,
    stage: DispatchStage,
    started: Instant,
}

impl DispatchContext {
    fn new(identity: &ClientIdentity, channel: Channel) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            client_id: identity.client_id.clone(),
            channel,
            stage: DispatchStage::Authenticated,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, stage: DispatchStage) {
        debug!(
            request_id = %self.request_id,
            client_id = %self.client_id,
            from = ?self.stage,
            to = ?stage,
            "Dispatch stage advanced"
        );
        self.stage = stage;
    }
}

#[derive(Clone)]
pub struct RelayDispatcher {
    ledger: BillingLedger,
    router: RoutingResolver,
    vault: CredentialVault,
    provider: Arc<dyn ProviderClient>,
    rates: RateCard,
    public_host: Option<String>,
}

impl RelayDispatcher {
    pub fn new(
        ledger: BillingLedger,
        router: RoutingResolver,
        vault: CredentialVault,
        provider: Arc<dyn ProviderClient>,
        rates: RateCard,
        public_host: Option<String>,
    ) -> Self {
        Self {
            ledger,
            router,
            vault,
            provider,
            rates,
            public_host: public_host.map(|h| h.trim_end_matches('/').to_string()),
        }
    }

    pub fn ledger(&self) -> &BillingLedger {
        &self.ledger
    }

    /// 在独立任务中执行调度；调用方断开连接不会中断预留、提交或释放
    pub async fn dispatch_detached(
        &self,
        identity: ClientIdentity,
        channel: Channel,
        request: SendRequest,
    ) -> Result<SendReceipt, RelayError> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.dispatch(&identity, channel, request).await })
            .await
            .map_err(|e| {
                error!(error = %e, "Dispatch task aborted");
                RelayError::Dependency(DependencyError::StoreUnavailable(format!("dispatch task aborted: {}", e)))
            })?
    }

    /// 执行一次完整的发送流程
    pub async fn dispatch(
        &self,
        identity: &ClientIdentity,
        channel: Channel,
        request: SendRequest,
    ) -> Result<SendReceipt, RelayError> {
        let mut ctx = DispatchContext::new(identity, channel);

        if !identity.allows(channel) {
            warn!(client_id = %identity.client_id, key_prefix = %identity.key_prefix, channel = %channel, "Channel not permitted");
            return Err(RelayError::ChannelNotPermitted {
                channel: channel.to_string(),
            });
        }
        request.validate(channel)?;

        let routing_number = match channel {
            Channel::WhatsApp => strip_whatsapp_prefix(&request.to).to_string(),
            _ => request.to.trim().to_string(),
        };

        let cost = self.rates.cost_for(channel);
        let details = ReservationDetails::new(channel, routing_number.clone()).with_api_key(identity.api_key_id.clone());
        let token = self.ledger.reserve(&identity.client_id, cost, &details).await?;
        ctx.advance(DispatchStage::Reserved);

        match self.forward(&mut ctx, identity, &token, &routing_number, request).await {
            Ok(receipt) => {
                ctx.advance(DispatchStage::Committed);
                info!(
                    request_id = %ctx.request_id,
                    client_id = %ctx.client_id,
                    channel = %ctx.channel,
                    transaction_id = %receipt.transaction_id,
                    provider_message_id = %receipt.provider_message_id,
                    elapsed_ms = ctx.started.elapsed().as_millis() as u64,
                    "Relay request committed"
                );
                Ok(receipt)
            }
            Err(err) => {
                let failed_at = ctx.stage;
                self.roll_back(&mut ctx, &token, &err).await;
                warn!(
                    request_id = %ctx.request_id,
                    client_id = %ctx.client_id,
                    channel = %ctx.channel,
                    failed_after = ?failed_at,
                    error_kind = err.kind(),
                    error = %err,
                    "Relay request rolled back"
                );
                Err(err)
            }
        }
    }

    /// 路由、解密、出站调用与提交
    async fn forward(
        &self,
        ctx: &mut DispatchContext,
        identity: &ClientIdentity,
        token: &ReservationToken,
        routing_number: &str,
        request: SendRequest,
    ) -> Result<SendReceipt, RelayError> {
        let account = self
            .router
            .resolve(routing_number, identity.forced_account_sid.as_deref())
            .await?;
        ctx.advance(DispatchStage::Routed);

        let credential = ProviderCredential {
            account_sid: account.sid.clone(),
            auth_token: self.vault.decrypt(&account.encrypted_token)?,
        };
        ctx.advance(DispatchStage::Decrypted);

        let message = self.outbound_message(ctx.channel, &account, request)?;
        let receipt = self.provider.send(&credential, &message).await?;
        ctx.advance(DispatchStage::Dispatched);

        let commit = CommitDetails {
            provider_message_id: receipt.provider_message_id.clone(),
            provider_status: receipt.status.clone(),
            account_sid: account.sid.clone(),
        };
        let transaction = self.ledger.commit(token, token.amount, &commit).await.map_err(|e| {
            error!(
                request_id = %ctx.request_id,
                transaction_id = %token.transaction_id,
                provider_message_id = %receipt.provider_message_id,
                error = %e,
                "Provider accepted request but commit failed"
            );
            e
        })?;

        Ok(SendReceipt {
            transaction_id: transaction.id,
            provider_message_id: receipt.provider_message_id,
            status: receipt.status,
            account_sid: account.sid,
            cost: from_units(transaction.cost_units),
            balance: from_units(transaction.balance_after_units),
        })
    }

    async fn roll_back(&self, ctx: &mut DispatchContext, token: &ReservationToken, err: &RelayError) {
        let reason = format!("{}: {}", err.kind(), err);
        match self.ledger.release(token, &reason).await {
            Ok(_) => ctx.advance(DispatchStage::RolledBack),
            Err(release_err) => {
                // 预留仍为 pending，由回收任务兜底释放
                error!(
                    request_id = %ctx.request_id,
                    transaction_id = %token.transaction_id,
                    error = %release_err,
                    "Failed to release reservation"
                );
            }
        }
    }

    /// 补全发送方号码、回调地址与 WhatsApp 前缀
    fn outbound_message(
        &self,
        channel: Channel,
        account: &ProviderAccount,
        request: SendRequest,
    ) -> Result<OutboundMessage, RelayError> {
        let from = request
            .from
            .filter(|f| !f.trim().is_empty())
            .or_else(|| account.phone_number.clone())
            .ok_or_else(|| {
                RelayError::InvalidRequest(format!("'from' is required: account {} has no default number", account.sid))
            })?;

        let status_callback = request
            .status_callback
            .or_else(|| self.public_host.as_ref().map(|host| format!("{}{}", host, WEBHOOK_PATH)));

        let (to, from) = match channel {
            Channel::WhatsApp => (with_whatsapp_prefix(&request.to), with_whatsapp_prefix(&from)),
            _ => (request.to.trim().to_string(), from),
        };

        Ok(OutboundMessage {
            channel,
            to,
            from,
            body: request.body,
            media_urls: request.media_urls,
            status_callback,
            twiml: request.twiml,
            url: request.url,
        })
    }
}

fn strip_whatsapp_prefix(number: &str) -> &str {
    let number = number.trim();
    number.strip_prefix(WHATSAPP_PREFIX).unwrap_or(number)
}

fn with_whatsapp_prefix(number: &str) -> String {
    format!("{}{}", WHATSAPP_PREFIX, strip_whatsapp_prefix(number))
}
