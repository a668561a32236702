mod transaction;

pub use transaction::{
    Transaction,
    TransactionStatus,
    get_transaction_by_id,
    get_transaction_by_provider_message_id,
    list_transactions_by_client,
    list_stale_pending_transactions,
    apply_delivery_status,
};
