use redis::aio::ConnectionManager;
use redis::Client;
use mailer_core::{MailerError, MailerResult};
use tracing::{debug, error, warn};

/// Redis连接管理器
///
/// 包装 `redis::aio::ConnectionManager`，断线后由其自动重连；
/// 命令失败统一映射为 `QueueUnavailable`。
#[derive(Clone)]
pub struct RedisConnectionManager {
    connection: ConnectionManager,
}

impl RedisConnectionManager {
    pub async fn new(url: &str) -> MailerResult<Self> {
        let client = Client::open(url).map_err(|e| {
            MailerError::Configuration(format!("Failed to create Redis client: {e}"))
        })?;
        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to connect to Redis: {}", e);
            MailerError::QueueUnavailable(format!("Failed to connect to Redis: {e}"))
        })?;

        let manager = Self { connection };
        manager.ping().await?;
        debug!("Successfully connected to Redis");
        Ok(manager)
    }

    pub async fn execute_command<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> MailerResult<T> {
        let mut connection = self.connection.clone();
        cmd.query_async(&mut connection)
            .await
            .map_err(|e| MailerError::QueueUnavailable(format!("Redis command failed: {e}")))
    }

    pub async fn ping(&self) -> MailerResult<()> {
        let response: String = self.execute_command(&redis::cmd("PING")).await?;
        if response == "PONG" {
            Ok(())
        } else {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            Err(MailerError::QueueUnavailable(error_msg))
        }
    }

    pub async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}
