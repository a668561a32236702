//! # HTTP 接入层
//!
//! 发送接口、投递状态回调与健康检查；所有错误都以 JSON 返回。

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;

pub use server::{AppState, RelayServer};
