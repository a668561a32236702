mod provider_account;

pub use provider_account::{
    ProviderAccount,
    create_provider_account,
    create_provider_account_from_raw_token,
    get_provider_account_by_sid,
    get_active_provider_account,
    set_provider_account_active,
    list_provider_accounts,
    rotate_provider_tokens,
};
