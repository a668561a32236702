use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
    Extension,
};

use crate::relay::auth::ClientIdentity;
use crate::relay::channel::Channel;
use crate::relay::error::RelayError;
use crate::web::dto::relay_dto::{SendMessageBody, SendResponse};
use crate::web::server::AppState;

/// 发送短信
pub async fn send_sms(
    State(state): State<AppState>,
    Extension(identity): Extension<ClientIdentity>,
    payload: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Json<SendResponse>, RelayError> {
    relay(state, identity, Channel::Sms, payload).await
}

/// 发送 WhatsApp 消息
pub async fn send_whatsapp(
    State(state): State<AppState>,
    Extension(identity): Extension<ClientIdentity>,
    payload: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Json<SendResponse>, RelayError> {
    relay(state, identity, Channel::WhatsApp, payload).await
}

/// 发起语音呼叫
pub async fn send_call(
    State(state): State<AppState>,
    Extension(identity): Extension<ClientIdentity>,
    payload: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Json<SendResponse>, RelayError> {
    relay(state, identity, Channel::Voice, payload).await
}

async fn relay(
    state: AppState,
    identity: ClientIdentity,
    channel: Channel,
    payload: Result<Json<SendMessageBody>, JsonRejection>,
) -> Result<Json<SendResponse>, RelayError> {
    let Json(body) = payload?;
    let receipt = state
        .dispatcher
        .dispatch_detached(identity, channel, body.into())
        .await?;
    Ok(Json(receipt.into()))
}
