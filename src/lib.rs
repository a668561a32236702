//! # Relay Gateway
//!
//! 位于API客户端与下游消息服务商之间的中继网关：
//! 鉴权、预付费扣费、规则路由、凭证解密、转发并记录交易。

pub mod config;
pub mod dao;
pub mod logger;
pub mod relay;
pub mod web;
