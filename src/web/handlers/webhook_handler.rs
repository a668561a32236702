use axum::{
    extract::{rejection::FormRejection, State},
    http::StatusCode,
    response::Json,
    Form,
};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::web::dto::relay_dto::StatusCallbackForm;
use crate::web::server::AppState;

/// 服务商投递状态回调
///
/// 未知消息与无法解析的回调同样返回 200，避免服务商无限重发；
/// 只有存储故障返回 503，让服务商稍后重发，状态与退款不会丢失。
pub async fn status_callback(
    State(state): State<AppState>,
    form: Result<Form<StatusCallbackForm>, FormRejection>,
) -> (StatusCode, Json<Value>) {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => {
            warn!(reason = %rejection.body_text(), "Malformed status callback ignored");
            return (StatusCode::OK, Json(json!({ "status": "ignored" })));
        }
    };

    let (Some(provider_message_id), Some(status)) = (form.provider_message_id(), form.status()) else {
        warn!("Status callback without message id or status ignored");
        return (StatusCode::OK, Json(json!({ "status": "ignored" })));
    };

    match state.webhook.ingest(provider_message_id, status).await {
        Ok(outcome) => (StatusCode::OK, Json(json!({ "status": "received", "outcome": outcome }))),
        Err(e) => {
            error!(provider_message_id = %provider_message_id, error = %e, "Failed to ingest status callback");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "retry", "error": e.kind() })),
            )
        }
    }
}
