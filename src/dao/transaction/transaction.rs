use serde::{Deserialize, Serialize};
use sqlx::{Result, SqlitePool};

/// 交易的计费状态；只允许单向迁移：
/// pending -> committed | failed，committed -> refunded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Committed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Committed => "committed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(TransactionStatus::Pending),
            "committed" => Some(TransactionStatus::Committed),
            "failed" => Some(TransactionStatus::Failed),
            "refunded" => Some(TransactionStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub client_id: String,
    pub api_key_id: Option<String>,
    pub channel: String,
    pub destination: String,
    pub account_sid: Option<String>,
    pub cost_units: i64,
    pub balance_after_units: i64,
    pub provider_message_id: Option<String>,
    pub status: String,
    pub delivery_status: Option<String>,
    pub delivery_rank: i64,
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Transaction {
    pub fn status(&self) -> Option<TransactionStatus> {
        TransactionStatus::parse(&self.status)
    }
}

/// Read a transaction by id (async)
pub async fn get_transaction_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Transaction>> {
    let transaction = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(transaction)
}

/// Read a transaction by the provider-assigned message id (async)
pub async fn get_transaction_by_provider_message_id(pool: &SqlitePool, provider_message_id: &str) -> Result<Option<Transaction>> {
    let transaction = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE provider_message_id = ?")
        .bind(provider_message_id)
        .fetch_optional(pool)
        .await?;
    Ok(transaction)
}

/// List transactions of a client, newest first (async)
pub async fn list_transactions_by_client(pool: &SqlitePool, client_id: &str) -> Result<Vec<Transaction>> {
    let transactions = sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions WHERE client_id = ? ORDER BY created_at DESC, id",
    )
        .bind(client_id)
        .fetch_all(pool)
        .await?;
    Ok(transactions)
}

/// List pending transactions created more than `older_than_secs` seconds ago (async)
pub async fn list_stale_pending_transactions(pool: &SqlitePool, older_than_secs: i64) -> Result<Vec<Transaction>> {
    let transactions = sqlx::query_as::<_, Transaction>(r#"
        SELECT * FROM transactions
        WHERE status = 'pending' AND created_at <= datetime('now', ?)
        ORDER BY created_at
    "#)
        .bind(format!("-{} seconds", older_than_secs))
        .fetch_all(pool)
        .await?;
    Ok(transactions)
}

/// Record a delivery status only if it advances the stored rank (async)
///
/// Out-of-order or duplicated callbacks affect zero rows. Accepts a pool or an open transaction.
pub async fn apply_delivery_status<'e, E>(
    executor: E,
    transaction_id: &str,
    delivery_status: &str,
    delivery_rank: i64,
) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let res = sqlx::query(r#"
        UPDATE transactions SET
            delivery_status = ?,
            delivery_rank = ?,
            updated_at = datetime('now')
        WHERE id = ? AND delivery_rank < ?
    "#)
        .bind(delivery_status)
        .bind(delivery_rank)
        .bind(transaction_id)
        .bind(delivery_rank)
        .execute(executor)
        .await?;
    Ok(res.rows_affected())
}
