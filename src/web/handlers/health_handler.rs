use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
};
use serde_json::{json, Value};

use crate::web::server::AppState;

/// 健康检查端点：数据库可用且主密钥可正常加解密
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => json!({ "status": "ok" }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    };

    let encryption = match state.vault.encrypt("health").and_then(|c| state.vault.decrypt(&c)) {
        Ok(plain) if plain == "health" => json!({ "status": "ok" }),
        Ok(_) => json!({ "status": "error", "message": "round trip mismatch" }),
        Err(e) => json!({ "status": "error", "message": e.to_string() }),
    };

    let healthy = database["status"] == "ok" && encryption["status"] == "ok";
    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "service": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "database": database,
                "encryption": encryption,
            }
        })),
    )
}
