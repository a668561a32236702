use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};
use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use anyhow::Result;

/// 日志级别枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for &'static str {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(anyhow::anyhow!("Unknown log level: {}", other)),
        }
    }
}

/// 日志配置结构体
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LogLevel,
    /// 日志文件目录
    pub log_dir: String,
    /// 日志文件名前缀
    pub file_prefix: String,
    /// 是否启用控制台输出
    pub console_output: bool,
    /// 文件日志是否使用JSON格式
    pub json_format: bool,
    /// 日志文件滚动策略 (daily, hourly)
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            log_dir: "logs".to_string(),
            file_prefix: "relay".to_string(),
            console_output: true,
            json_format: false,
            rotation: "daily".to_string(),
        }
    }
}

/// 初始化日志系统
///
/// 返回的 guard 必须在进程生命周期内持有，drop 时会刷新剩余日志。
pub fn init_logger(config: LogConfig) -> Result<WorkerGuard> {
    // 确保日志目录存在
    std::fs::create_dir_all(&config.log_dir)?;

    let file_appender = match config.rotation.as_str() {
        "hourly" => rolling::hourly(&config.log_dir, &config.file_prefix),
        _ => rolling::daily(&config.log_dir, &config.file_prefix),
    };
    let (non_blocking_file, guard) = non_blocking(file_appender);

    // RUST_LOG 优先，否则只输出本 crate 与 HTTP 追踪
    let level: &str = config.level.into();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={level},tower_http={level}",
            env!("CARGO_PKG_NAME").replace('-', "_")
        ))
    });

    let file_layer = if config.json_format {
        fmt::layer()
            .json()
            .with_writer(non_blocking_file)
            .with_timer(ChronoUtc::rfc_3339())
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(non_blocking_file)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let console_layer = config.console_output.then(|| {
        fmt::layer()
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(true)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    Ok(guard)
}

/// 快速初始化开发环境日志
pub fn init_dev_logger() -> Result<WorkerGuard> {
    let config = LogConfig {
        level: LogLevel::Debug,
        log_dir: "logs".to_string(),
        file_prefix: "dev".to_string(),
        console_output: true,
        json_format: false,
        rotation: "daily".to_string(),
    };
    init_logger(config)
}

/// 快速初始化生产环境日志
pub fn init_prod_logger() -> Result<WorkerGuard> {
    let config = LogConfig {
        level: LogLevel::Info,
        log_dir: "/var/log/relay_gateway".to_string(),
        file_prefix: "relay".to_string(),
        console_output: false,
        json_format: true,
        rotation: "daily".to_string(),
    };
    init_logger(config)
}
