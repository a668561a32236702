//! # 投递状态回调
//!
//! 服务商回调可能乱序或重复到达。每个状态有一个单调的等级，只有等级严格提升的更新才会写入，
//! 所以晚到的 `sent` 不会覆盖已经写入的 `delivered`。终态失败触发一次性退款。

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::dao::transaction::get_transaction_by_provider_message_id;
use crate::relay::billing::{BillingLedger, DeliveryUpdate};
use crate::relay::error::RelayError;

/// 投递状态等级，未知状态为 0（永远不会被写入）
pub fn delivery_rank(status: &str) -> i64 {
    match status.to_ascii_lowercase().as_str() {
        "queued" | "accepted" | "initiated" | "scheduled" => 1,
        "sending" | "ringing" => 2,
        "sent" | "in-progress" => 3,
        "delivered" | "read" | "completed" | "failed" | "undelivered" | "canceled" | "busy" | "no-answer" => 4,
        _ => 0,
    }
}

/// 是否为需要退款的终态失败
pub fn is_terminal_failure(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "failed" | "undelivered" | "canceled" | "busy" | "no-answer"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestOutcome {
    /// 没有对应的交易
    UnknownMessage,
    /// 等级没有提升，忽略
    Stale,
    Applied,
    /// 写入终态失败并完成退款
    AppliedAndRefunded,
}

#[derive(Clone)]
pub struct WebhookIngestor {
    pool: SqlitePool,
    ledger: BillingLedger,
}

impl WebhookIngestor {
    pub fn new(pool: SqlitePool, ledger: BillingLedger) -> Self {
        Self { pool, ledger }
    }

    /// 处理一次状态回调
    pub async fn ingest(&self, provider_message_id: &str, status: &str) -> Result<IngestOutcome, RelayError> {
        let status = status.trim().to_ascii_lowercase();

        let Some(transaction) = get_transaction_by_provider_message_id(&self.pool, provider_message_id).await? else {
            info!(provider_message_id = %provider_message_id, status = %status, "Callback for unknown message ignored");
            return Ok(IngestOutcome::UnknownMessage);
        };

        let rank = delivery_rank(&status);
        if rank == 0 {
            debug!(provider_message_id = %provider_message_id, status = %status, "Unrecognised delivery status ignored");
            return Ok(IngestOutcome::Stale);
        }

        let refund_reason = is_terminal_failure(&status).then(|| format!("delivery {}", status));
        let update = self
            .ledger
            .record_delivery(&transaction.id, &status, rank, refund_reason.as_deref())
            .await?;

        match update {
            DeliveryUpdate::Stale => {
                debug!(
                    provider_message_id = %provider_message_id,
                    status = %status,
                    current = transaction.delivery_status.as_deref().unwrap_or("-"),
                    "Stale delivery status ignored"
                );
                Ok(IngestOutcome::Stale)
            }
            DeliveryUpdate::Applied => {
                info!(
                    transaction_id = %transaction.id,
                    provider_message_id = %provider_message_id,
                    status = %status,
                    "Delivery status updated"
                );
                Ok(IngestOutcome::Applied)
            }
            DeliveryUpdate::Refunded => Ok(IngestOutcome::AppliedAndRefunded),
        }
    }
}
