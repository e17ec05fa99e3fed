use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::{MailerError, MailerResult};

use super::models::{
    DatabaseConfig, DeliveryConfig, ObservabilityConfig, QueueConfig, WorkerConfig,
};

/// 环境变量前缀，例如 `MAILER_DELIVERY__API_KEY`
pub const ENV_PREFIX: &str = "MAILER";

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/mailer.toml",
    "mailer.toml",
    "/etc/mailer/config.toml",
];

/// 系统配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub queue: QueueConfig,
    pub delivery: DeliveryConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 内置默认值
    /// 2. 配置文件（TOML），未指定时依次尝试默认路径
    /// 3. 环境变量覆盖（前缀 `MAILER_`，层级分隔符 `__`）
    ///
    /// 缺少任一必需项（broker地址、队列名称、API Key、发件人）时立即返回
    /// `MailerError::Configuration`。
    pub fn load(config_path: Option<&str>) -> MailerResult<Self> {
        Self::load_from(config_path, None)
    }

    pub(crate) fn load_from(
        config_path: Option<&str>,
        env_source: Option<config::Map<String, String>>,
    ) -> MailerResult<Self> {
        let mut builder = ConfigBuilder::builder();

        match config_path {
            Some(path) => {
                if !Path::new(path).exists() {
                    return Err(MailerError::Configuration(format!(
                        "配置文件不存在: {path}"
                    )));
                }
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
            None => {
                if let Some(path) = DEFAULT_CONFIG_PATHS
                    .iter()
                    .find(|path| Path::new(path).exists())
                {
                    builder = builder.add_source(File::new(path, FileFormat::Toml));
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(env_source),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| MailerError::Configuration(format!("构建配置失败: {e}")))?
            .try_deserialize()
            .map_err(|e| MailerError::Configuration(format!("反序列化配置失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// 校验全部配置项
    pub fn validate(&self) -> MailerResult<()> {
        self.database.validate()?;
        self.queue.validate()?;
        self.delivery.validate()?;
        self.worker.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID_TOML: &str = r#"
[queue]
url = "redis://127.0.0.1:6379/0"
primary_queue = "email-jobs"
dead_letter_queue = "email-jobs-dlq"

[delivery]
api_key = "SG.test"
from_email = "noreply@example.com"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_file_applies_defaults() {
        let file = write_config(VALID_TOML);
        let config =
            AppConfig::load_from(file.path().to_str(), Some(config::Map::new())).unwrap();

        assert_eq!(config.queue.primary_queue, "email-jobs");
        assert_eq!(config.queue.batch_size, 10);
        assert_eq!(config.queue.wait_time_seconds, 20);
        assert_eq!(config.queue.visibility_timeout_seconds, 60);
        assert_eq!(config.worker.idle_backoff_ms, 2_000);
        assert_eq!(config.worker.error_backoff_ms, 10_000);
        assert_eq!(config.delivery.api_base_url, "https://api.sendgrid.com");
    }

    #[test]
    fn test_drain_timeout_covers_poll_and_visibility() {
        let file = write_config(VALID_TOML);
        let mut config =
            AppConfig::load_from(file.path().to_str(), Some(config::Map::new())).unwrap();
        assert_eq!(config.queue.drain_timeout(), std::time::Duration::from_secs(80));

        config.queue.wait_time_seconds = 1;
        config.queue.visibility_timeout_seconds = 5;
        assert_eq!(config.queue.drain_timeout(), std::time::Duration::from_secs(30));

        config.queue.visibility_timeout_seconds = 300;
        assert_eq!(config.queue.drain_timeout(), std::time::Duration::from_secs(301));
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        let file = write_config(
            r#"
[queue]
url = "redis://127.0.0.1:6379/0"
primary_queue = "email-jobs"
dead_letter_queue = "email-jobs-dlq"

[delivery]
from_email = "noreply@example.com"
"#,
        );
        let result = AppConfig::load_from(file.path().to_str(), Some(config::Map::new()));
        assert!(matches!(result, Err(MailerError::Configuration(_))));
    }

    #[test]
    fn test_missing_dead_letter_queue_fails_fast() {
        let mut config = AppConfig::default();
        config.queue.url = "redis://localhost".to_string();
        config.queue.primary_queue = "jobs".to_string();
        config.delivery.api_key = "key".to_string();
        config.delivery.from_email = "a@b.c".to_string();
        assert!(matches!(
            config.validate(),
            Err(MailerError::Configuration(_))
        ));
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(VALID_TOML);
        let mut env = config::Map::new();
        env.insert(
            "MAILER_DELIVERY__FROM_EMAIL".to_string(),
            "campaigns@example.com".to_string(),
        );
        env.insert("MAILER_WORKER__MAX_CONCURRENCY".to_string(), "4".to_string());

        let config = AppConfig::load_from(file.path().to_str(), Some(env)).unwrap();
        assert_eq!(config.delivery.from_email, "campaigns@example.com");
        assert_eq!(config.worker.max_concurrency, 4);
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let result = AppConfig::load_from(Some("/nonexistent/mailer.toml"), None);
        assert!(matches!(result, Err(MailerError::Configuration(_))));
    }
}
