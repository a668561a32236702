mod api_key;

pub use api_key::{
    ApiKey,
    ApiKeyWithClient,
    hash_api_key,
    create_api_key,
    generate_api_key,
    get_api_key_by_id,
    find_api_key_with_client_by_hash,
    set_api_key_active,
};
