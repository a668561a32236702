use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// 中继支持的发送渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    WhatsApp,
    Voice,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::WhatsApp => "whatsapp",
            Channel::Voice => "voice",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 各渠道的单次固定费用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateCard {
    pub sms: Decimal,
    pub whatsapp: Decimal,
    pub voice: Decimal,
}

impl Default for RateCard {
    fn default() -> Self {
        Self {
            sms: dec!(0.0075),
            whatsapp: dec!(0.0050),
            voice: dec!(0.015),
        }
    }
}

impl RateCard {
    pub fn cost_for(&self, channel: Channel) -> Decimal {
        match channel {
            Channel::Sms => self.sms,
            Channel::WhatsApp => self.whatsapp,
            Channel::Voice => self.voice,
        }
    }
}
