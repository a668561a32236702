//! # Twilio REST 客户端
//!
//! 短信与 WhatsApp 走 `Messages.json`，语音呼叫走 `Calls.json`，均为表单编码 + basic auth。

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::client::{BaseClient, ClientConfig};
use super::{OutboundMessage, ProviderClient, ProviderCredential, ProviderReceipt};
use crate::relay::channel::Channel;
use crate::relay::error::ProviderError;

pub const DEFAULT_BASE_URL: &str = "https://api.twilio.com";

/// 受理成功的响应体
#[derive(Debug, Deserialize)]
struct TwilioResource {
    sid: String,
    #[serde(default)]
    status: Option<String>,
}

/// 错误响应体
#[derive(Debug, Deserialize)]
struct TwilioErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TwilioClient {
    base: BaseClient,
    base_url: String,
}

impl TwilioClient {
    pub fn new(base_url: impl Into<String>, config: ClientConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            base: BaseClient::new(config)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_client(&self) -> &BaseClient {
        &self.base
    }

    fn endpoint(&self, account_sid: &str, channel: Channel) -> String {
        let resource = match channel {
            Channel::Voice => "Calls.json",
            Channel::Sms | Channel::WhatsApp => "Messages.json",
        };
        format!("{}/2010-04-01/Accounts/{}/{}", self.base_url, account_sid, resource)
    }
}

/// 构造 Twilio 表单参数
pub fn build_form(message: &OutboundMessage) -> Vec<(String, String)> {
    let mut form = vec![
        ("To".to_string(), message.to.clone()),
        ("From".to_string(), message.from.clone()),
    ];

    match message.channel {
        Channel::Voice => {
            if let Some(twiml) = &message.twiml {
                form.push(("Twiml".to_string(), twiml.clone()));
            } else if let Some(url) = &message.url {
                form.push(("Url".to_string(), url.clone()));
            }
        }
        Channel::Sms | Channel::WhatsApp => {
            if let Some(body) = &message.body {
                form.push(("Body".to_string(), body.clone()));
            }
            for media_url in &message.media_urls {
                form.push(("MediaUrl".to_string(), media_url.clone()));
            }
        }
    }

    if let Some(callback) = &message.status_callback {
        form.push(("StatusCallback".to_string(), callback.clone()));
    }
    form
}

#[async_trait]
impl ProviderClient for TwilioClient {
    async fn send(
        &self,
        credential: &ProviderCredential,
        message: &OutboundMessage,
    ) -> Result<ProviderReceipt, ProviderError> {
        let url = self.endpoint(&credential.account_sid, message.channel);
        let form = build_form(message);

        let response = self
            .base
            .post_form(&url, (&credential.account_sid, &credential.auth_token), &form)
            .await?;

        if !response.is_success() {
            let parsed: Option<TwilioErrorBody> = serde_json::from_str(&response.body).ok();
            let (code, message) = match parsed {
                Some(body) => (body.code, body.message.unwrap_or_else(|| response.body.clone())),
                None => (None, response.body.clone()),
            };
            warn!(
                account_sid = %credential.account_sid,
                status_code = response.status,
                code = ?code,
                reason = %message,
                "Twilio rejected request"
            );
            return Err(ProviderError::Rejected {
                status: response.status,
                code,
                message,
            });
        }

        let resource: TwilioResource = serde_json::from_str(&response.body)
            .map_err(|e| ProviderError::Unavailable(format!("Malformed provider response: {}", e)))?;

        debug!(account_sid = %credential.account_sid, provider_message_id = %resource.sid, "Twilio accepted request");

        Ok(ProviderReceipt {
            provider_message_id: resource.sid,
            status: resource.status.unwrap_or_else(|| "queued".to_string()),
        })
    }

    fn client_name(&self) -> &'static str {
        "twilio"
    }
}
