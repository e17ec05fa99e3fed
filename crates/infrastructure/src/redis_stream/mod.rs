//! Redis Stream消息队列模块
//!
//! 主队列和死信队列各对应一个Stream。接收通过消费者组完成：
//! 先用 `XAUTOCLAIM` 认领空闲超过可见性超时的待确认条目，再用非阻塞
//! `XREADGROUP` 读取新条目；确认时 `XACK` 并 `XDEL`。
//!
//! 确认凭据由条目ID和投递次数组成。确认前用 `XPENDING` 核对条目仍属于本消费者
//! 且投递次数未变，条目被其他消费者或新一轮投递认领后，旧凭据不再有效。

pub mod connection_manager;
pub mod stream_operations;

pub use connection_manager::RedisConnectionManager;
pub use stream_operations::{PendingEntry, RedisStreamOperations, StreamEntry};

use std::time::{Duration, Instant};

use async_trait::async_trait;
use mailer_core::{
    config::QueueConfig, AckToken, DeadLetterMessage, EmailJobMessage, MailerError,
    MailerResult, QueueClient, ReceivedMessage,
};
use tracing::{debug, info, warn};

/// 确认凭据中ID与投递次数的分隔符，Stream条目ID不含该字符
const TOKEN_SEPARATOR: char = '#';

fn ack_token_for(entry: &StreamEntry) -> AckToken {
    if entry.delivery_count_known {
        AckToken::new(format!(
            "{}{TOKEN_SEPARATOR}{}",
            entry.id, entry.delivery_count
        ))
    } else {
        AckToken::new(entry.id.clone())
    }
}

/// 拆分确认凭据，不带投递次数的凭据只核对持有者
fn parse_ack_token(token: &str) -> (&str, Option<u32>) {
    match token.rsplit_once(TOKEN_SEPARATOR) {
        Some((id, count)) => match count.parse() {
            Ok(count) => (id, Some(count)),
            Err(_) => (token, None),
        },
        None => (token, None),
    }
}

/// 健康状态
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub error_message: Option<String>,
}

/// 基于Redis Stream的队列客户端
pub struct RedisStreamQueue {
    connection_manager: RedisConnectionManager,
    primary: RedisStreamOperations,
    dead_letter: RedisStreamOperations,
    batch_size: usize,
    wait_time: Duration,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl RedisStreamQueue {
    /// 连接Redis并确保主队列的消费者组存在
    ///
    /// 队列URL或名称缺失时返回 `Configuration` 错误。
    pub async fn connect(config: &QueueConfig) -> MailerResult<Self> {
        config.validate()?;
        let consumer = config.resolved_consumer_name();
        let connection_manager = RedisConnectionManager::new(&config.url).await?;

        let primary = RedisStreamOperations::new(
            connection_manager.clone(),
            &config.primary_queue,
            &config.consumer_group,
            &consumer,
        );
        let dead_letter = RedisStreamOperations::new(
            connection_manager.clone(),
            &config.dead_letter_queue,
            &config.consumer_group,
            &consumer,
        );
        primary.ensure_consumer_group_exists().await?;

        info!(
            "Redis stream queue ready: primary={}, dead_letter={}, group={}, consumer={}",
            config.primary_queue, config.dead_letter_queue, config.consumer_group, consumer
        );

        Ok(Self {
            connection_manager,
            primary,
            dead_letter,
            batch_size: config.batch_size,
            wait_time: config.wait_time(),
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
        })
    }

    /// 健康检查
    pub async fn health_check(&self) -> HealthStatus {
        match self.connection_manager.ping().await {
            Ok(()) => HealthStatus {
                healthy: true,
                error_message: None,
            },
            Err(e) => HealthStatus {
                healthy: false,
                error_message: Some(e.to_string()),
            },
        }
    }

    pub async fn primary_len(&self) -> MailerResult<u64> {
        self.primary.len().await
    }

    pub async fn dead_letter_len(&self) -> MailerResult<u64> {
        self.dead_letter.len().await
    }

    async fn fetch_once(&self) -> MailerResult<Vec<StreamEntry>> {
        let mut entries = self
            .primary
            .auto_claim(self.visibility_timeout, self.batch_size)
            .await?;
        if !entries.is_empty() {
            debug!(
                "Reclaimed {} entries from {} after visibility timeout",
                entries.len(),
                self.primary.stream()
            );
        }

        let remaining = self.batch_size.saturating_sub(entries.len());
        if remaining > 0 {
            entries.extend(self.primary.read_new(remaining).await?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl QueueClient for RedisStreamQueue {
    async fn enqueue(&self, message: &EmailJobMessage) -> MailerResult<()> {
        let body = message.encode()?;
        self.primary.add(&body).await?;
        Ok(())
    }

    async fn receive_batch(&self) -> MailerResult<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + self.wait_time;

        loop {
            let entries = self.fetch_once().await?;
            if !entries.is_empty() {
                return Ok(entries
                    .into_iter()
                    .map(|entry| {
                        if entry.body.is_none() {
                            warn!("Stream entry {} has no body field", entry.id);
                        }
                        ReceivedMessage {
                            ack_token: ack_token_for(&entry),
                            body: entry.body.unwrap_or_default(),
                            receive_count: entry.delivery_count,
                        }
                    })
                    .collect());
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
        }
    }

    async fn acknowledge(&self, ack_token: &AckToken) -> MailerResult<()> {
        let (id, delivery_count) = parse_ack_token(ack_token.as_str());
        match self.primary.pending_entry(id).await? {
            Some(pending)
                if pending.consumer == self.primary.consumer()
                    && delivery_count.map_or(true, |count| count == pending.delivery_count) => {}
            Some(pending) => {
                return Err(MailerError::InvalidState(format!(
                    "Entry {id} was reclaimed by {} (delivery {})",
                    pending.consumer, pending.delivery_count
                )));
            }
            None => {
                return Err(MailerError::InvalidState(format!(
                    "Entry {id} is not pending in {}",
                    self.primary.stream()
                )));
            }
        }

        let acked = self.primary.ack_and_delete(id).await?;
        if acked == 0 {
            return Err(MailerError::InvalidState(format!(
                "Entry {id} is not pending in {}",
                self.primary.stream()
            )));
        }
        Ok(())
    }

    async fn dead_letter(&self, body: &str, reason: &str) -> MailerResult<()> {
        let encoded = DeadLetterMessage::from_raw(body, reason).encode()?;
        self.dead_letter.add(&encoded).await?;
        Ok(())
    }
}
