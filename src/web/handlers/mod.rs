pub mod health_handler;
pub mod send_handler;
pub mod webhook_handler;
