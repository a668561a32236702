use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::relay::error::RelayError;
use crate::web::server::AppState;

/// 携带调用方原始 key 的请求头
pub const AUTH_HEADER: &str = "x-proxy-auth";

/// 校验 API Key，并把 `ClientIdentity` 放入请求扩展
pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let raw_key = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let identity = state.auth.authenticate(raw_key.as_deref()).await?;
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}
