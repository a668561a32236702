use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

use crate::relay::error::RelayError;
use crate::web::dto::relay_dto::ErrorResponse;

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error_kind = self.kind(), error = %self, "Request failed");
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::InvalidRequest(rejection.body_text())
    }
}

/// 未匹配路由的 JSON 404
pub async fn not_found() -> Response {
    let body = ErrorResponse {
        error: "not_found".to_string(),
        message: "No such endpoint".to_string(),
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// 路径存在但方法不匹配时的 JSON 405
pub async fn method_not_allowed() -> Response {
    let body = ErrorResponse {
        error: "method_not_allowed".to_string(),
        message: "Method not allowed for this endpoint".to_string(),
    };
    (StatusCode::METHOD_NOT_ALLOWED, Json(body)).into_response()
}
