use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{MailerError, MailerResult};

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = MailerError;

    fn from_str(s: &str) -> MailerResult<Self> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(MailerError::Configuration(format!(
                "不支持的日志格式: {other}"
            ))),
        }
    }
}

/// 构建日志过滤器，`RUST_LOG` 优先于配置的级别
pub fn build_env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// 初始化日志系统，进程内只能调用一次
pub fn init_logging(log_level: &str, format: LogFormat) -> MailerResult<()> {
    let registry = tracing_subscriber::registry().with(build_env_filter(log_level));

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| MailerError::Configuration(format!("初始化JSON日志格式失败: {e}"))),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .map_err(|e| MailerError::Configuration(format!("初始化Pretty日志格式失败: {e}"))),
    }
}
