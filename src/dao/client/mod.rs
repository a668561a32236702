mod client;

pub use client::{
    Client,
    create_client,
    get_client_by_id,
    get_client_balance_units,
    set_client_active,
};
