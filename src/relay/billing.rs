//! # 预付费账本
//!
//! 并发纪律：在一个作用域事务内做条件扣减
//! `UPDATE clients ... WHERE balance_units >= ?`，由 SQLite 的单写者锁串行化同一数据库上的写入；
//! 不持有任何跨越服务商调用的内存锁，预留以 `pending` 交易记录的形式持久存在。
//! 写锁竞争（SQLITE_BUSY）时整个事务重试，次数有上限，耗尽后返回 `LedgerContention`。
//! 事务对象在任何错误路径上被 drop 时自动回滚。

use rust_decimal::Decimal;
use sqlx::SqlitePool;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dao::is_busy_error;
use crate::dao::transaction::{apply_delivery_status, list_stale_pending_transactions, Transaction};
use crate::relay::channel::Channel;
use crate::relay::error::{AuthError, BillingError, DependencyError, RelayError};
use crate::relay::money::{from_units, to_units};
use crate::relay::webhook::delivery_rank;

/// 账本重试配置
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// 写锁竞争时的最大尝试次数
    pub max_attempts: u32,
    /// 重试基础延迟，按尝试次数线性增长
    pub retry_delay: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(20),
        }
    }
}

/// 预留时记录到交易上的信息
#[derive(Debug, Clone)]
pub struct ReservationDetails {
    pub api_key_id: Option<String>,
    pub channel: Channel,
    pub destination: String,
}

impl ReservationDetails {
    pub fn new(channel: Channel, destination: impl Into<String>) -> Self {
        Self {
            api_key_id: None,
            channel,
            destination: destination.into(),
        }
    }

    pub fn with_api_key(mut self, api_key_id: impl Into<String>) -> Self {
        self.api_key_id = Some(api_key_id.into());
        self
    }
}

/// 一次成功预留的凭据，对应一条 `pending` 交易
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationToken {
    pub transaction_id: String,
    pub client_id: String,
    pub amount: Decimal,
    pub balance_after: Decimal,
}

/// 服务商受理后写入交易的信息
#[derive(Debug, Clone)]
pub struct CommitDetails {
    pub provider_message_id: String,
    pub provider_status: String,
    pub account_sid: String,
}

enum AttemptError {
    Store(sqlx::Error),
    Rejected(RelayError),
}

impl From<sqlx::Error> for AttemptError {
    fn from(err: sqlx::Error) -> Self {
        AttemptError::Store(err)
    }
}

impl From<RelayError> for AttemptError {
    fn from(err: RelayError) -> Self {
        AttemptError::Rejected(err)
    }
}

impl From<BillingError> for AttemptError {
    fn from(err: BillingError) -> Self {
        AttemptError::Rejected(err.into())
    }
}

impl From<AuthError> for AttemptError {
    fn from(err: AuthError) -> Self {
        AttemptError::Rejected(err.into())
    }
}

/// 一次投递状态写入的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryUpdate {
    /// 等级没有提升，未写入
    Stale,
    Applied,
    /// 写入并完成退款
    Refunded,
}

#[derive(Clone)]
pub struct BillingLedger {
    pool: SqlitePool,
    config: LedgerConfig,
}

impl BillingLedger {
    pub fn new(pool: SqlitePool, config: LedgerConfig) -> Self {
        Self { pool, config }
    }

    /// 查询客户当前余额
    pub async fn balance(&self, client_id: &str) -> Result<Option<Decimal>, RelayError> {
        let units = crate::dao::client::get_client_balance_units(&self.pool, client_id).await?;
        Ok(units.map(from_units))
    }

    /// 原子地检查并扣减余额，同时写入一条 `pending` 交易
    pub async fn reserve(
        &self,
        client_id: &str,
        amount: Decimal,
        details: &ReservationDetails,
    ) -> Result<ReservationToken, RelayError> {
        let units = positive_units(amount)?;
        let token = self
            .run_with_retry(client_id, move || self.try_reserve(client_id, units, details))
            .await?;

        info!(
            transaction_id = %token.transaction_id,
            client_id = %client_id,
            amount = %token.amount,
            balance_after = %token.balance_after,
            "Balance reserved"
        );
        Ok(token)
    }

    /// 服务商受理后确认扣费；`final_amount` 低于预留额时退回差额，高于预留额时按预留额封顶
    ///
    /// 对同一预留重复调用返回已确认的交易，不会重复扣费。
    pub async fn commit(
        &self,
        token: &ReservationToken,
        final_amount: Decimal,
        details: &CommitDetails,
    ) -> Result<Transaction, RelayError> {
        let reserved_units = positive_units(token.amount)?;
        let mut final_units = to_units(final_amount)
            .filter(|units| *units >= 0)
            .ok_or_else(|| RelayError::InvalidRequest(format!("invalid final amount: {}", final_amount)))?;

        if final_units > reserved_units {
            warn!(
                transaction_id = %token.transaction_id,
                reserved = %token.amount,
                requested = %final_amount,
                "Final amount exceeds reservation, capping at reserved amount"
            );
            final_units = reserved_units;
        }

        let transaction = self
            .run_with_retry(&token.client_id, move || {
                self.try_commit(token, reserved_units, final_units, details)
            })
            .await?;

        info!(
            transaction_id = %transaction.id,
            client_id = %transaction.client_id,
            provider_message_id = %details.provider_message_id,
            cost = %from_units(transaction.cost_units),
            balance_after = %from_units(transaction.balance_after_units),
            "Reservation committed"
        );
        Ok(transaction)
    }

    /// 服务商调用失败时退回预留金额并将交易标记为 failed
    ///
    /// 幂等：只有仍处于 `pending` 的交易会被退款，重复调用返回 `false` 且不重复入账。
    pub async fn release(&self, token: &ReservationToken, reason: &str) -> Result<bool, RelayError> {
        self.release_transaction(&token.client_id, &token.transaction_id, reason)
            .await
    }

    /// 将已确认的交易退款（committed -> refunded），只会生效一次
    pub async fn refund(&self, transaction_id: &str, reason: &str) -> Result<bool, RelayError> {
        let refunded = self
            .run_with_retry(transaction_id, move || self.try_refund(transaction_id, reason))
            .await?;

        if refunded {
            info!(transaction_id = %transaction_id, reason = %reason, "Transaction refunded");
        } else {
            debug!(transaction_id = %transaction_id, "Refund skipped: transaction not in committed state");
        }
        Ok(refunded)
    }

    /// 在同一个事务内写入投递状态，并在 `refund_reason` 存在时退款已确认的交易
    ///
    /// 退款失败时状态写入一并回滚，重发的回调仍会被当作新状态处理，不会丢失退款。
    pub async fn record_delivery(
        &self,
        transaction_id: &str,
        status: &str,
        rank: i64,
        refund_reason: Option<&str>,
    ) -> Result<DeliveryUpdate, RelayError> {
        let update = self
            .run_with_retry(transaction_id, move || {
                self.try_record_delivery(transaction_id, status, rank, refund_reason)
            })
            .await?;

        if update == DeliveryUpdate::Refunded {
            info!(transaction_id = %transaction_id, status = %status, "Transaction refunded on delivery failure");
        }
        Ok(update)
    }

    /// 为客户充值，返回充值后的余额
    pub async fn credit(&self, client_id: &str, amount: Decimal) -> Result<Decimal, RelayError> {
        let units = positive_units(amount)?;
        let balance = self
            .run_with_retry(client_id, move || self.try_credit(client_id, units))
            .await?;

        info!(client_id = %client_id, amount = %amount, balance = %balance, "Client balance credited");
        Ok(balance)
    }

    /// 回滚创建时间早于 `older_than` 的全部 `pending` 交易，返回实际回滚的数量
    pub async fn release_expired(&self, older_than: Duration) -> Result<usize, RelayError> {
        let stale = list_stale_pending_transactions(&self.pool, older_than.as_secs() as i64).await?;
        let mut released = 0;

        for transaction in stale {
            match self
                .release_transaction(&transaction.client_id, &transaction.id, "reservation expired")
                .await
            {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(transaction_id = %transaction.id, error = %e, "Failed to release expired reservation");
                }
            }
        }
        Ok(released)
    }

    async fn release_transaction(
        &self,
        client_id: &str,
        transaction_id: &str,
        reason: &str,
    ) -> Result<bool, RelayError> {
        let released = self
            .run_with_retry(client_id, move || self.try_release(transaction_id, reason))
            .await?;

        if released {
            info!(transaction_id = %transaction_id, client_id = %client_id, reason = %reason, "Reservation released");
        } else {
            debug!(transaction_id = %transaction_id, "Release skipped: reservation already settled");
        }
        Ok(released)
    }

    async fn try_reserve(
        &self,
        client_id: &str,
        units: i64,
        details: &ReservationDetails,
    ) -> Result<ReservationToken, AttemptError> {
        let mut tx = self.pool.begin().await?;

        let debited: Option<(i64,)> = sqlx::query_as(r#"
            UPDATE clients SET
                balance_units = balance_units - ?,
                updated_at = datetime('now')
            WHERE id = ? AND is_active = 1 AND balance_units >= ?
            RETURNING balance_units
        "#)
            .bind(units)
            .bind(client_id)
            .bind(units)
            .fetch_optional(&mut *tx)
            .await?;

        let Some((balance_after,)) = debited else {
            let current: Option<(i64, bool)> = sqlx::query_as("SELECT balance_units, is_active FROM clients WHERE id = ?")
                .bind(client_id)
                .fetch_optional(&mut *tx)
                .await?;

            return Err(match current {
                Some((balance, true)) => BillingError::InsufficientFunds {
                    balance: from_units(balance),
                    required: from_units(units),
                }
                .into(),
                _ => AuthError::InvalidKey.into(),
            });
        };

        let transaction_id = Uuid::new_v4().to_string();
        sqlx::query(r#"
            INSERT INTO transactions (
                id, client_id, api_key_id, channel, destination, cost_units,
                balance_after_units, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', datetime('now'), datetime('now'))
        "#)
            .bind(&transaction_id)
            .bind(client_id)
            .bind(&details.api_key_id)
            .bind(details.channel.as_str())
            .bind(&details.destination)
            .bind(units)
            .bind(balance_after)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ReservationToken {
            transaction_id,
            client_id: client_id.to_string(),
            amount: from_units(units),
            balance_after: from_units(balance_after),
        })
    }

    async fn try_commit(
        &self,
        token: &ReservationToken,
        reserved_units: i64,
        final_units: i64,
        details: &CommitDetails,
    ) -> Result<Transaction, AttemptError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(r#"
            UPDATE transactions SET
                status = 'committed',
                cost_units = ?,
                provider_message_id = ?,
                account_sid = ?,
                delivery_status = ?,
                delivery_rank = ?,
                updated_at = datetime('now')
            WHERE id = ? AND status = 'pending'
        "#)
            .bind(final_units)
            .bind(&details.provider_message_id)
            .bind(&details.account_sid)
            .bind(&details.provider_status)
            .bind(delivery_rank(&details.provider_status))
            .bind(&token.transaction_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if updated == 0 {
            let existing = sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = ?")
                .bind(&token.transaction_id)
                .fetch_optional(&mut *tx)
                .await?;

            return match existing {
                Some(existing) if existing.status == "committed" => Ok(existing),
                Some(existing) => Err(BillingError::ReservationSettled {
                    transaction_id: existing.id,
                    status: existing.status,
                }
                .into()),
                None => Err(RelayError::InvalidRequest(format!(
                    "unknown reservation {}",
                    token.transaction_id
                ))
                .into()),
            };
        }

        let refund_units = reserved_units - final_units;
        let balance: (i64,) = sqlx::query_as(r#"
            UPDATE clients SET
                balance_units = balance_units + ?,
                updated_at = datetime('now')
            WHERE id = ?
            RETURNING balance_units
        "#)
            .bind(refund_units)
            .bind(&token.client_id)
            .fetch_one(&mut *tx)
            .await?;

        let transaction = sqlx::query_as::<_, Transaction>(
            "UPDATE transactions SET balance_after_units = ? WHERE id = ? RETURNING *",
        )
            .bind(balance.0)
            .bind(&token.transaction_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn try_release(&self, transaction_id: &str, reason: &str) -> Result<bool, AttemptError> {
        let mut tx = self.pool.begin().await?;

        let settled: Option<(String, i64)> = sqlx::query_as(r#"
            UPDATE transactions SET
                status = 'failed',
                failure_reason = ?,
                updated_at = datetime('now')
            WHERE id = ? AND status = 'pending'
            RETURNING client_id, cost_units
        "#)
            .bind(reason)
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some((client_id, cost_units)) = settled else {
            return Ok(false);
        };

        restore_balance(&mut tx, transaction_id, &client_id, cost_units).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn try_refund(&self, transaction_id: &str, reason: &str) -> Result<bool, AttemptError> {
        let mut tx = self.pool.begin().await?;

        let settled: Option<(String, i64)> = sqlx::query_as(r#"
            UPDATE transactions SET
                status = 'refunded',
                failure_reason = ?,
                updated_at = datetime('now')
            WHERE id = ? AND status = 'committed'
            RETURNING client_id, cost_units
        "#)
            .bind(reason)
            .bind(transaction_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some((client_id, cost_units)) = settled else {
            return Ok(false);
        };

        restore_balance(&mut tx, transaction_id, &client_id, cost_units).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn try_record_delivery(
        &self,
        transaction_id: &str,
        status: &str,
        rank: i64,
        refund_reason: Option<&str>,
    ) -> Result<DeliveryUpdate, AttemptError> {
        let mut tx = self.pool.begin().await?;

        if apply_delivery_status(&mut *tx, transaction_id, status, rank).await? == 0 {
            return Ok(DeliveryUpdate::Stale);
        }

        let mut update = DeliveryUpdate::Applied;
        if let Some(reason) = refund_reason {
            let settled: Option<(String, i64)> = sqlx::query_as(r#"
                UPDATE transactions SET
                    status = 'refunded',
                    failure_reason = ?,
                    updated_at = datetime('now')
                WHERE id = ? AND status = 'committed'
                RETURNING client_id, cost_units
            "#)
                .bind(reason)
                .bind(transaction_id)
                .fetch_optional(&mut *tx)
                .await?;

            if let Some((client_id, cost_units)) = settled {
                restore_balance(&mut tx, transaction_id, &client_id, cost_units).await?;
                update = DeliveryUpdate::Refunded;
            }
        }

        tx.commit().await?;
        Ok(update)
    }

    async fn try_credit(&self, client_id: &str, units: i64) -> Result<Decimal, AttemptError> {
        let mut tx = self.pool.begin().await?;

        let balance: Option<(i64,)> = sqlx::query_as(r#"
            UPDATE clients SET
                balance_units = balance_units + ?,
                updated_at = datetime('now')
            WHERE id = ?
            RETURNING balance_units
        "#)
            .bind(units)
            .bind(client_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some((balance,)) = balance else {
            return Err(RelayError::InvalidRequest(format!("unknown client {}", client_id)).into());
        };

        tx.commit().await?;
        Ok(from_units(balance))
    }

    /// 执行一次账本尝试；只有写锁竞争会重试
    async fn run_with_retry<T, F, Fut>(&self, client_id: &str, mut attempt: F) -> Result<T, RelayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Rejected(e)) => return Err(e),
                Err(AttemptError::Store(e)) if is_busy_error(&e) => {
                    if attempts >= self.config.max_attempts {
                        warn!(client_id = %client_id, attempts = attempts, "Ledger contention, giving up");
                        return Err(BillingError::LedgerContention {
                            client_id: client_id.to_string(),
                            attempts,
                        }
                        .into());
                    }
                    debug!(client_id = %client_id, attempt = attempts, "Ledger busy, retrying");
                    sleep(self.config.retry_delay * attempts).await;
                }
                Err(AttemptError::Store(e)) => {
                    error!(client_id = %client_id, error = %e, "Ledger store error");
                    return Err(DependencyError::from(e).into());
                }
            }
        }
    }
}

/// 在当前事务内把交易金额退回客户余额，并记录退回后的余额
async fn restore_balance(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    transaction_id: &str,
    client_id: &str,
    cost_units: i64,
) -> Result<(), sqlx::Error> {
    let balance: (i64,) = sqlx::query_as(r#"
        UPDATE clients SET
            balance_units = balance_units + ?,
            updated_at = datetime('now')
        WHERE id = ?
        RETURNING balance_units
    "#)
        .bind(cost_units)
        .bind(client_id)
        .fetch_one(&mut **tx)
        .await?;

    sqlx::query("UPDATE transactions SET balance_after_units = ? WHERE id = ?")
        .bind(balance.0)
        .bind(transaction_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

fn positive_units(amount: Decimal) -> Result<i64, RelayError> {
    to_units(amount)
        .filter(|units| *units > 0)
        .ok_or_else(|| RelayError::InvalidRequest(format!("invalid amount: {}", amount)))
}
