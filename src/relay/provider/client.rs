//! # 通用出站 HTTP 客户端
//!
//! 统一的超时与重试基础设施：
//! - 连接失败与 5xx 响应按配置重试
//! - 4xx 响应原样返回给上层解析，不重试
//! - 超时不重试，服务商可能已经受理了这次请求

use reqwest::Client as HttpClient;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::relay::error::ProviderError;

/// 超时配置
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// 单次尝试的总超时时间（含读取响应体）
    pub request_timeout: Duration,
    /// 连接超时时间
    pub connect_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大尝试次数（含首次），2 表示最多重试一次
    pub max_attempts: u32,
    /// 基础延迟时间
    pub base_delay: Duration,
    /// 最大延迟时间
    pub max_delay: Duration,
    /// 是否启用指数退避
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            exponential_backoff: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }
}

/// 完整的客户端配置
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: TimeoutConfig,
    pub retry: RetryConfig,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            user_agent: format!("relay-gateway/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: TimeoutConfig) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// 请求上下文信息，用于日志记录和问题追踪
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub url: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub start_time: Instant,
    pub attempt_start_time: Instant,
    pub retry_reason: Option<String>,
}

impl RequestContext {
    pub fn new(url: &str, max_attempts: u32) -> Self {
        let now = Instant::now();
        Self {
            request_id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            attempt: 1,
            max_attempts,
            start_time: now,
            attempt_start_time: now,
            retry_reason: None,
        }
    }

    /// 开始新的重试尝试
    pub fn start_retry(&mut self, reason: String) {
        self.attempt += 1;
        self.attempt_start_time = Instant::now();
        self.retry_reason = Some(reason);
    }

    pub fn total_elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// 非 5xx 的 HTTP 响应
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

enum AttemptFailure {
    Retryable(String),
    Fatal(ProviderError),
}

/// 带超时与重试的 HTTP 客户端封装
#[derive(Debug, Clone)]
pub struct BaseClient {
    client: HttpClient,
    config: ClientConfig,
}

impl BaseClient {
    pub fn new(config: ClientConfig) -> Result<Self, ProviderError> {
        let client = HttpClient::builder()
            .no_proxy()
            .timeout(config.timeout.request_timeout)
            .connect_timeout(config.timeout.connect_timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// 以 basic auth 发送表单 POST
    pub async fn post_form(
        &self,
        url: &str,
        basic_auth: (&str, &str),
        form: &[(String, String)],
    ) -> Result<HttpResponse, ProviderError> {
        let mut ctx = RequestContext::new(url, self.config.retry.max_attempts);
        self.log_request_start(&ctx);

        loop {
            if ctx.attempt > 1 {
                let delay = self.calculate_backoff_delay(ctx.attempt - 1);
                self.log_retry_attempt(&ctx, delay);
                sleep(delay).await;
            }

            match self.attempt_post_form(&ctx, basic_auth, form).await {
                Ok(response) => {
                    self.log_request_success(&ctx, response.status);
                    return Ok(response);
                }
                Err(AttemptFailure::Fatal(err)) => {
                    self.log_request_failure(&ctx, &err);
                    return Err(err);
                }
                Err(AttemptFailure::Retryable(reason)) => {
                    if ctx.is_final_attempt() {
                        let err = ProviderError::Unavailable(reason);
                        self.log_request_failure(&ctx, &err);
                        return Err(err);
                    }
                    ctx.start_retry(reason);
                }
            }
        }
    }

    async fn attempt_post_form(
        &self,
        ctx: &RequestContext,
        basic_auth: (&str, &str),
        form: &[(String, String)],
    ) -> Result<HttpResponse, AttemptFailure> {
        let request_timeout = self.config.timeout.request_timeout;
        let request = self
            .client
            .post(&ctx.url)
            .basic_auth(basic_auth.0, Some(basic_auth.1))
            .form(form);

        let outcome = timeout(request_timeout, async move {
            let response = request.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(HttpResponse { status, body })
        })
        .await;

        match outcome {
            Err(_) => {
                self.log_timeout_error(ctx, request_timeout);
                Err(AttemptFailure::Fatal(ProviderError::Timeout {
                    timeout_ms: request_timeout.as_millis() as u64,
                }))
            }
            Ok(Err(e)) if e.is_timeout() => {
                self.log_timeout_error(ctx, request_timeout);
                Err(AttemptFailure::Fatal(ProviderError::Timeout {
                    timeout_ms: request_timeout.as_millis() as u64,
                }))
            }
            Ok(Err(e)) if e.is_connect() => {
                self.log_network_error(ctx, &e);
                Err(AttemptFailure::Retryable(format!("connection failed: {}", e)))
            }
            Ok(Err(e)) => {
                self.log_network_error(ctx, &e);
                Err(AttemptFailure::Fatal(ProviderError::Unavailable(e.to_string())))
            }
            Ok(Ok(response)) if response.status >= 500 => {
                self.log_api_error(ctx, &response.body, response.status);
                Err(AttemptFailure::Retryable(format!(
                    "provider returned {}: {}",
                    response.status, response.body
                )))
            }
            Ok(Ok(response)) => Ok(response),
        }
    }

    /// 计算回退延迟时间
    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let retry = &self.config.retry;
        let delay = if retry.exponential_backoff {
            retry.base_delay * 2_u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            retry.base_delay
        };
        std::cmp::min(delay, retry.max_delay)
    }

    fn log_request_start(&self, ctx: &RequestContext) {
        info!(
            request_id = %ctx.request_id,
            url = %ctx.url,
            max_attempts = ctx.max_attempts,
            "Starting provider request"
        );
    }

    fn log_retry_attempt(&self, ctx: &RequestContext, delay: Duration) {
        warn!(
            request_id = %ctx.request_id,
            url = %ctx.url,
            attempt = ctx.attempt,
            max_attempts = ctx.max_attempts,
            delay_ms = delay.as_millis() as u64,
            retry_reason = ctx.retry_reason.as_deref().unwrap_or("unknown"),
            "Retrying provider request"
        );
    }

    fn log_request_success(&self, ctx: &RequestContext, status: u16) {
        info!(
            request_id = %ctx.request_id,
            url = %ctx.url,
            attempt = ctx.attempt,
            status_code = status,
            total_elapsed_ms = ctx.total_elapsed().as_millis() as u64,
            "Provider request completed"
        );
    }

    fn log_request_failure(&self, ctx: &RequestContext, error: &ProviderError) {
        error!(
            request_id = %ctx.request_id,
            url = %ctx.url,
            attempt = ctx.attempt,
            total_elapsed_ms = ctx.total_elapsed().as_millis() as u64,
            error = %error,
            "Provider request failed"
        );
    }

    fn log_network_error(&self, ctx: &RequestContext, error: &reqwest::Error) {
        error!(
            request_id = %ctx.request_id,
            url = %ctx.url,
            attempt = ctx.attempt,
            is_connect = error.is_connect(),
            is_request = error.is_request(),
            error_type = "network_error",
            error_message = %error,
            "Network error occurred"
        );
    }

    fn log_timeout_error(&self, ctx: &RequestContext, timeout_duration: Duration) {
        error!(
            request_id = %ctx.request_id,
            url = %ctx.url,
            attempt = ctx.attempt,
            timeout_duration_ms = timeout_duration.as_millis() as u64,
            error_type = "timeout_error",
            "Provider request timed out"
        );
    }

    fn log_api_error(&self, ctx: &RequestContext, message: &str, status_code: u16) {
        error!(
            request_id = %ctx.request_id,
            url = %ctx.url,
            attempt = ctx.attempt,
            status_code = status_code,
            error_type = "api_error",
            error_message = %message,
            "Provider server error"
        );
    }
}
