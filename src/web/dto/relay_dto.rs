use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::relay::dispatcher::{SendReceipt, SendRequest};

/// `media_url` 既可以是单个地址也可以是列表
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(url) => vec![url],
            OneOrMany::Many(urls) => urls,
        }
    }
}

/// 发送请求体；同时接受小写字段与服务商风格的大写字段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendMessageBody {
    #[serde(default, alias = "To")]
    pub to: Option<String>,
    #[serde(default, alias = "From")]
    pub from: Option<String>,
    #[serde(default, alias = "Body")]
    pub body: Option<String>,
    #[serde(default, alias = "MediaUrl", alias = "media_urls")]
    pub media_url: Option<OneOrMany>,
    #[serde(default, alias = "StatusCallback")]
    pub status_callback: Option<String>,
    #[serde(default, alias = "Twiml")]
    pub twiml: Option<String>,
    #[serde(default, alias = "Url")]
    pub url: Option<String>,
}

impl From<SendMessageBody> for SendRequest {
    fn from(body: SendMessageBody) -> Self {
        SendRequest {
            to: body.to.unwrap_or_default(),
            from: body.from,
            body: body.body,
            media_urls: body.media_url.map(OneOrMany::into_vec).unwrap_or_default(),
            status_callback: body.status_callback,
            twiml: body.twiml,
            url: body.url,
        }
    }
}

/// 发送成功响应
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub status: String,
    pub sid: String,
    pub transaction_id: String,
    pub cost: Decimal,
    pub balance: Decimal,
}

impl From<SendReceipt> for SendResponse {
    fn from(receipt: SendReceipt) -> Self {
        SendResponse {
            status: receipt.status,
            sid: receipt.provider_message_id,
            transaction_id: receipt.transaction_id,
            cost: receipt.cost,
            balance: receipt.balance,
        }
    }
}

/// 统一错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// 服务商状态回调（表单编码）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatusCallbackForm {
    #[serde(rename = "MessageSid")]
    pub message_sid: Option<String>,
    #[serde(rename = "SmsSid")]
    pub sms_sid: Option<String>,
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "MessageStatus")]
    pub message_status: Option<String>,
    #[serde(rename = "SmsStatus")]
    pub sms_status: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
}

impl StatusCallbackForm {
    pub fn provider_message_id(&self) -> Option<&str> {
        self.message_sid
            .as_deref()
            .or(self.sms_sid.as_deref())
            .or(self.call_sid.as_deref())
    }

    pub fn status(&self) -> Option<&str> {
        self.message_status
            .as_deref()
            .or(self.sms_status.as_deref())
            .or(self.call_status.as_deref())
    }
}
