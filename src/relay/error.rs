//! # 中继错误分类
//!
//! 每个到达请求边界的错误都会被转换为带稳定 kind 标签的 JSON 响应。

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing authorization header")]
    MissingHeader,
    #[error("Invalid API key")]
    InvalidKey,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BillingError {
    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: Decimal, required: Decimal },
    #[error("Ledger contention on client {client_id} after {attempts} attempts")]
    LedgerContention { client_id: String, attempts: u32 },
    /// 预留已被其他路径结算（例如回收任务已将其回滚）
    #[error("Reservation {transaction_id} already settled as {status}")]
    ReservationSettled { transaction_id: String, status: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No route found for destination {destination}")]
    NoMatch { destination: String },
    #[error("Invalid pattern in routing rule {rule_id}: {reason}")]
    InvalidPattern { rule_id: i64, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Credential decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("Credential encryption failed: {0}")]
    EncryptionFailed(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// 服务商明确拒绝（4xx），保留其原因与错误码
    #[error("Provider rejected request (status {status}): {message}")]
    Rejected {
        status: u16,
        code: Option<i64>,
        message: String,
    },
    #[error("Provider unavailable: {0}")]
    Unavailable(String),
    #[error("Provider request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DependencyError {
    #[error("Persistent store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl From<sqlx::Error> for DependencyError {
    fn from(err: sqlx::Error) -> Self {
        DependencyError::StoreUnavailable(err.to_string())
    }
}

/// 请求边界上的统一错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("{channel} capability disabled for this API key")]
    ChannelNotPermitted { channel: String },
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Billing(#[from] BillingError),
    #[error(transparent)]
    Routing(#[from] RoutingError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        RelayError::Dependency(err.into())
    }
}

impl RelayError {
    /// 机器可读的稳定错误标签
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Auth(AuthError::MissingHeader) => "missing_header",
            RelayError::Auth(AuthError::InvalidKey) => "invalid_key",
            RelayError::ChannelNotPermitted { .. } => "channel_not_permitted",
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::Billing(BillingError::InsufficientFunds { .. }) => "insufficient_funds",
            RelayError::Billing(BillingError::LedgerContention { .. }) => "ledger_contention",
            RelayError::Billing(BillingError::ReservationSettled { .. }) => "reservation_settled",
            RelayError::Routing(RoutingError::NoMatch { .. }) => "no_route",
            RelayError::Routing(RoutingError::InvalidPattern { .. }) => "invalid_pattern",
            RelayError::Credential(CredentialError::DecryptionFailed(_)) => "decryption_failed",
            RelayError::Credential(CredentialError::EncryptionFailed(_)) => "encryption_failed",
            RelayError::Provider(ProviderError::Rejected { .. }) => "provider_rejected",
            RelayError::Provider(ProviderError::Unavailable(_)) => "provider_unavailable",
            RelayError::Provider(ProviderError::Timeout { .. }) => "provider_timeout",
            RelayError::Dependency(DependencyError::StoreUnavailable(_)) => "store_unavailable",
            RelayError::Dependency(DependencyError::CacheUnavailable(_)) => "cache_unavailable",
        }
    }

    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Auth(_) => 401,
            RelayError::ChannelNotPermitted { .. } => 403,
            RelayError::InvalidRequest(_) => 400,
            RelayError::Billing(BillingError::InsufficientFunds { .. }) => 402,
            RelayError::Billing(BillingError::LedgerContention { .. }) => 503,
            RelayError::Billing(BillingError::ReservationSettled { .. }) => 409,
            RelayError::Routing(RoutingError::NoMatch { .. }) => 503,
            RelayError::Routing(RoutingError::InvalidPattern { .. }) => 500,
            RelayError::Credential(_) => 500,
            RelayError::Provider(ProviderError::Rejected { .. }) => 500,
            RelayError::Provider(_) => 503,
            RelayError::Dependency(_) => 503,
        }
    }

    /// 是否属于"稍后重试"类错误
    pub fn is_transient(&self) -> bool {
        self.status_code() == 503
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_contention_is_distinct_from_insufficient_funds() {
        let funds: RelayError = BillingError::InsufficientFunds {
            balance: dec!(2.50),
            required: dec!(7.50),
        }
        .into();
        let contention: RelayError = BillingError::LedgerContention {
            client_id: "c1".to_string(),
            attempts: 5,
        }
        .into();

        assert_eq!(funds.status_code(), 402);
        assert!(!funds.is_transient());
        assert_eq!(contention.status_code(), 503);
        assert!(contention.is_transient());
        assert_ne!(funds.kind(), contention.kind());
    }

    #[test]
    fn test_dependency_errors_fail_closed_with_503() {
        let err: RelayError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.kind(), "store_unavailable");
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_provider_rejection_keeps_reason() {
        let err: RelayError = ProviderError::Rejected {
            status: 400,
            code: Some(21211),
            message: "The 'To' number is not a valid phone number.".to_string(),
        }
        .into();
        assert_eq!(err.kind(), "provider_rejected");
        assert!(err.to_string().contains("not a valid phone number"));
    }
}
