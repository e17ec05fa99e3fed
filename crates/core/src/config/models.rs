use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{MailerError, MailerResult};

/// 数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://mailer.db".to_string(),
            max_connections: 10,
            min_connections: 1,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> MailerResult<()> {
        if self.url.trim().is_empty() {
            return Err(MailerError::Configuration("数据库URL不能为空".to_string()));
        }
        if self.max_connections == 0 {
            return Err(MailerError::Configuration(
                "数据库最大连接数必须大于0".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(MailerError::Configuration(
                "数据库最小连接数不能大于最大连接数".to_string(),
            ));
        }
        Ok(())
    }
}

/// 消息队列配置
///
/// `url` 中包含broker地址与凭据；主队列和死信队列名称必须显式配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub url: String,
    pub primary_queue: String,
    pub dead_letter_queue: String,
    pub consumer_group: String,
    /// 消费者名称，为空时使用主机名
    pub consumer_name: String,
    pub batch_size: usize,
    pub wait_time_seconds: u64,
    pub visibility_timeout_seconds: u64,
    /// 长轮询期间两次拉取之间的间隔
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            primary_queue: String::new(),
            dead_letter_queue: String::new(),
            consumer_group: "mailer".to_string(),
            consumer_name: String::new(),
            batch_size: 10,
            wait_time_seconds: 20,
            visibility_timeout_seconds: 60,
            poll_interval_ms: 500,
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> MailerResult<()> {
        if self.url.trim().is_empty() {
            return Err(MailerError::Configuration("消息队列URL不能为空".to_string()));
        }
        self.validate_queues()
    }

    /// 校验与broker无关的队列参数，内存队列也使用这部分校验
    pub fn validate_queues(&self) -> MailerResult<()> {
        if self.primary_queue.trim().is_empty() {
            return Err(MailerError::Configuration("主队列名称不能为空".to_string()));
        }
        if self.dead_letter_queue.trim().is_empty() {
            return Err(MailerError::Configuration("死信队列名称不能为空".to_string()));
        }
        if self.primary_queue == self.dead_letter_queue {
            return Err(MailerError::Configuration(
                "主队列与死信队列不能相同".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(MailerError::Configuration("批量大小必须大于0".to_string()));
        }
        if self.visibility_timeout_seconds == 0 {
            return Err(MailerError::Configuration(
                "可见性超时必须大于0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_seconds)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// 关闭时等待消费循环退出的时长
    ///
    /// 覆盖一次完整的拉取等待与一个可见性超时周期，至少30秒。
    pub fn drain_timeout(&self) -> Duration {
        (self.wait_time() + self.visibility_timeout()).max(Duration::from_secs(30))
    }

    /// 实际使用的消费者名称
    pub fn resolved_consumer_name(&self) -> String {
        if !self.consumer_name.trim().is_empty() {
            return self.consumer_name.clone();
        }
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "mailer-consumer".to_string())
    }
}

/// 投递服务商配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub api_key: String,
    pub from_email: String,
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            from_email: String::new(),
            api_base_url: "https://api.sendgrid.com".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> MailerResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(MailerError::Configuration(
                "投递服务商API Key不能为空".to_string(),
            ));
        }
        if self.from_email.trim().is_empty() || !self.from_email.contains('@') {
            return Err(MailerError::Configuration(format!(
                "发件人地址无效: '{}'",
                self.from_email
            )));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(MailerError::Configuration(
                "投递服务商地址不能为空".to_string(),
            ));
        }
        Ok(())
    }
}

/// 消费循环配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrency: usize,
    pub idle_backoff_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            idle_backoff_ms: 2_000,
            error_backoff_ms: 10_000,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> MailerResult<()> {
        if self.max_concurrency == 0 {
            return Err(MailerError::Configuration("最大并发数必须大于0".to_string()));
        }
        Ok(())
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "0.0.0.0:9090".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> MailerResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(MailerError::Configuration(format!(
                "无效的日志级别: {}，支持: {:?}",
                self.log_level, valid_levels
            )));
        }
        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(MailerError::Configuration(format!(
                "无效的日志格式: {}，支持: {:?}",
                self.log_format, valid_formats
            )));
        }
        if self.metrics_enabled && self.metrics_bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(MailerError::Configuration(format!(
                "无效的指标监听地址: {}",
                self.metrics_bind_address
            )));
        }
        Ok(())
    }
}
