use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mailer_core::{
    config::QueueConfig, AckToken, DeadLetterMessage, EmailJobMessage, MailerError,
    MailerResult, QueueClient, ReceivedMessage,
};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 内存消息队列配置
#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    pub batch_size: usize,
    pub wait_time: Duration,
    pub visibility_timeout: Duration,
    /// 等待期间检查可见性过期的间隔
    pub poll_interval: Duration,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            wait_time: Duration::from_secs(20),
            visibility_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl From<&QueueConfig> for InMemoryQueueConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            wait_time: config.wait_time(),
            visibility_timeout: config.visibility_timeout(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// 内存消息队列实现
///
/// 模拟托管队列的可见性超时语义：接收后的消息在超时前对其他接收者不可见，
/// 超时未确认则重新可见并签发新的回执，旧回执随之失效。适用于嵌入式运行和测试。
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    config: InMemoryQueueConfig,
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
}

#[derive(Debug, Default)]
struct QueueState {
    primary: VecDeque<QueueEntry>,
    dead_letters: Vec<String>,
}

#[derive(Debug)]
struct QueueEntry {
    body: String,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
    receive_count: u32,
}

impl QueueEntry {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.map_or(true, |deadline| deadline <= now)
    }
}

/// 队列统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// 主队列中尚未确认的消息总数
    pub total_messages: usize,
    /// 已被接收、仍在可见性超时内的消息数
    pub in_flight: usize,
    pub dead_letters: usize,
}

impl InMemoryQueue {
    pub fn new(config: InMemoryQueueConfig) -> MailerResult<Self> {
        if config.batch_size == 0 {
            return Err(MailerError::Configuration("批量大小必须大于0".to_string()));
        }
        if config.visibility_timeout.is_zero() {
            return Err(MailerError::Configuration(
                "可见性超时必须大于0".to_string(),
            ));
        }
        info!("Creating in-memory queue with config: {:?}", config);
        Ok(Self {
            config,
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
        })
    }

    /// 使用应用配置创建，队列名称缺失时立即失败
    pub fn from_config(config: &QueueConfig) -> MailerResult<Self> {
        config.validate_queues()?;
        Self::new(InMemoryQueueConfig::from(config))
    }

    /// 直接写入原始消息体，用于重放死信或注入测试数据
    pub async fn enqueue_raw(&self, body: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.primary.push_back(QueueEntry {
            body: body.into(),
            receipt: None,
            invisible_until: None,
            receive_count: 0,
        });
        drop(state);
        self.notify.notify_waiters();
    }

    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        QueueStats {
            total_messages: state.primary.len(),
            in_flight: state.primary.iter().filter(|e| !e.is_visible(now)).count(),
            dead_letters: state.dead_letters.len(),
        }
    }

    /// 读取死信队列内容（不移除）
    pub async fn dead_letters(&self) -> MailerResult<Vec<DeadLetterMessage>> {
        let state = self.state.lock().await;
        state
            .dead_letters
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(MailerError::from))
            .collect()
    }

    fn take_visible(&self, state: &mut QueueState) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut received = Vec::new();

        for entry in state.primary.iter_mut() {
            if received.len() >= self.config.batch_size {
                break;
            }
            if !entry.is_visible(now) {
                continue;
            }
            entry.receive_count += 1;
            let receipt = format!("{}-{}", Uuid::new_v4(), entry.receive_count);
            entry.receipt = Some(receipt.clone());
            entry.invisible_until = Some(now + self.config.visibility_timeout);

            if entry.receive_count > 1 {
                debug!(
                    "Redelivering message after visibility timeout (receive_count={})",
                    entry.receive_count
                );
            }

            received.push(ReceivedMessage {
                body: entry.body.clone(),
                ack_token: AckToken::new(receipt),
                receive_count: entry.receive_count,
            });
        }

        received
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn enqueue(&self, message: &EmailJobMessage) -> MailerResult<()> {
        let body = message.encode()?;
        self.enqueue_raw(body).await;
        debug!("Enqueued message for job {}", message.job_id);
        Ok(())
    }

    async fn receive_batch(&self) -> MailerResult<Vec<ReceivedMessage>> {
        let deadline = Instant::now() + self.config.wait_time;

        loop {
            // 先注册通知再检查队列，避免错过检查与等待之间的入队
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                let received = self.take_visible(&mut state);
                if !received.is_empty() {
                    return Ok(received);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let wait = (deadline - now).min(self.config.poll_interval);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn acknowledge(&self, ack_token: &AckToken) -> MailerResult<()> {
        let mut state = self.state.lock().await;
        let position = state
            .primary
            .iter()
            .position(|entry| entry.receipt.as_deref() == Some(ack_token.as_str()));

        match position {
            Some(index) => {
                state.primary.remove(index);
                debug!("Acknowledged message {}", ack_token);
                Ok(())
            }
            None => {
                warn!("Ack token {} is unknown or expired", ack_token);
                Err(MailerError::InvalidState(format!(
                    "回执已失效或不存在: {ack_token}"
                )))
            }
        }
    }

    async fn dead_letter(&self, body: &str, reason: &str) -> MailerResult<()> {
        let encoded = DeadLetterMessage::from_raw(body, reason).encode()?;
        self.state.lock().await.dead_letters.push(encoded);
        Ok(())
    }
}
