use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use std::future::Future;
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use anyhow::Result;
use tracing::info;

use crate::relay::{AuthenticationGateway, CredentialVault, RelayDispatcher, WebhookIngestor};
use crate::web::{
    error::{method_not_allowed, not_found},
    handlers::{
        health_handler::health_check,
        send_handler::{send_call, send_sms, send_whatsapp},
        webhook_handler::status_callback,
    },
    middleware::auth::require_api_key,
};

/// 请求处理共享的组件
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub vault: CredentialVault,
    pub auth: AuthenticationGateway,
    pub dispatcher: RelayDispatcher,
    pub webhook: WebhookIngestor,
}

pub struct RelayServer {
    state: AppState,
}

impl RelayServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// 监听地址并服务，直到 `shutdown` 完成
    pub async fn start<F>(&self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.create_app();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "Relay server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Relay server stopped");
        Ok(())
    }

    pub fn create_app(&self) -> Router {
        // 需要 API Key 的发送接口
        let api_routes = Router::new()
            .route("/sms", post(send_sms))
            .route("/whatsapp", post(send_whatsapp))
            .route("/call", post(send_call))
            .route_layer(from_fn_with_state(self.state.clone(), require_api_key))
            .route("/health", get(health_check))
            .method_not_allowed_fallback(method_not_allowed);

        // 嵌套后的路由不再受外层设置影响，每层单独设置 405
        let relay_routes = Router::new()
            .nest("/api", api_routes)
            .route("/twilio/webhook", post(status_callback))
            .method_not_allowed_fallback(method_not_allowed);

        Router::new()
            .nest("/relay", relay_routes)
            .fallback(not_found)
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.state.clone())
    }
}
