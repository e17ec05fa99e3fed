use std::any::Any;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use mailer_core::{
    config::WorkerConfig, CampaignRepository, CampaignStatus, EmailJobMessage,
    EmailJobRepository, JobStatusUpdate, MailerError, MailerResult, QueueClient,
    ReceivedMessage,
};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::delivery::DeliveryClient;

/// 单条消息的最终结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Sent,
    Failed { reason: String, dead_lettered: bool },
}

/// 单条消息的处理报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedMessage {
    pub job_id: Option<String>,
    pub outcome: MessageOutcome,
    pub acknowledged: bool,
}

/// 一个批次的处理汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub received: usize,
    pub sent: usize,
    pub failed: usize,
    /// 处理过程中panic的消息数，这些消息同时计入 `failed`
    pub panicked: usize,
    pub campaigns: BTreeSet<String>,
}

/// 消费循环构建器
pub struct ConsumerLoopBuilder {
    queue: Arc<dyn QueueClient>,
    jobs: Arc<dyn EmailJobRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    delivery: DeliveryClient,
    max_concurrency: usize,
    idle_backoff: Duration,
    error_backoff: Duration,
}

impl ConsumerLoopBuilder {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        jobs: Arc<dyn EmailJobRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        delivery: DeliveryClient,
    ) -> Self {
        let defaults = WorkerConfig::default();
        Self {
            queue,
            jobs,
            campaigns,
            delivery,
            max_concurrency: defaults.max_concurrency,
            idle_backoff: Duration::from_millis(defaults.idle_backoff_ms),
            error_backoff: Duration::from_millis(defaults.error_backoff_ms),
        }
    }

    /// 应用配置文件中的worker参数
    pub fn worker_config(self, config: &WorkerConfig) -> Self {
        self.max_concurrency(config.max_concurrency)
            .idle_backoff(Duration::from_millis(config.idle_backoff_ms))
            .error_backoff(Duration::from_millis(config.error_backoff_ms))
    }

    /// 设置最大并发处理数
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// 设置空批次后的休眠时间
    pub fn idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    /// 设置拉取失败后的退避时间
    pub fn error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }

    pub fn build(self) -> ConsumerLoop {
        ConsumerLoop {
            queue: self.queue,
            jobs: self.jobs,
            campaigns: self.campaigns,
            delivery: self.delivery,
            semaphore: Arc::new(Semaphore::new(self.max_concurrency)),
            idle_backoff: self.idle_backoff,
            error_backoff: self.error_backoff,
        }
    }
}

/// 消费循环
///
/// 拉取一批消息，并发处理后再拉取下一批。每条消息最终要么发送成功并确认，
/// 要么标记失败、写入死信队列并确认；单条消息的错误不会中断循环。
#[derive(Clone)]
pub struct ConsumerLoop {
    queue: Arc<dyn QueueClient>,
    jobs: Arc<dyn EmailJobRepository>,
    campaigns: Arc<dyn CampaignRepository>,
    delivery: DeliveryClient,
    semaphore: Arc<Semaphore>,
    idle_backoff: Duration,
    error_backoff: Duration,
}

impl ConsumerLoop {
    pub fn builder(
        queue: Arc<dyn QueueClient>,
        jobs: Arc<dyn EmailJobRepository>,
        campaigns: Arc<dyn CampaignRepository>,
        delivery: DeliveryClient,
    ) -> ConsumerLoopBuilder {
        ConsumerLoopBuilder::new(queue, jobs, campaigns, delivery)
    }

    /// 在后台任务中启动循环
    pub fn start(self) -> ConsumerHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let join = tokio::spawn(self.run(shutdown_rx));
        ConsumerHandle { shutdown_tx, join }
    }

    /// 运行循环直到收到停止信号
    ///
    /// 停止信号在每轮开始时检查，并能打断空闲和退避休眠；正在进行的拉取与批次处理会先完成。
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("消费循环启动");

        loop {
            match shutdown_rx.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => {
                    info!("消费循环收到停止信号");
                    break;
                }
            }

            let backoff = match self.poll_once().await {
                Ok(Some(summary)) => {
                    debug!(
                        "批次处理完成: received={}, sent={}, failed={}, panicked={}",
                        summary.received, summary.sent, summary.failed, summary.panicked
                    );
                    continue;
                }
                Ok(None) => self.idle_backoff,
                Err(e) => {
                    error!("拉取消息失败: {}", e);
                    metrics::counter!("mailer_receive_errors_total").increment(1);
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown_rx.recv() => {
                    info!("消费循环在休眠中收到停止信号");
                    break;
                }
            }
        }

        info!("消费循环已停止");
    }

    /// 执行一轮拉取与处理，空批次返回 `None`
    pub async fn poll_once(&self) -> MailerResult<Option<BatchSummary>> {
        let batch = self.queue.receive_batch().await?;
        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.process_batch(batch).await))
    }

    /// 并发处理一个批次，全部完成后把涉及的活动标记为完成
    pub async fn process_batch(&self, batch: Vec<ReceivedMessage>) -> BatchSummary {
        let mut summary = BatchSummary {
            received: batch.len(),
            campaigns: batch
                .iter()
                .filter_map(|message| message.decode().ok())
                .filter_map(|decoded| decoded.campaign_id().map(str::to_string))
                .collect(),
            ..BatchSummary::default()
        };

        let mut workers = JoinSet::new();
        for message in batch {
            let permit = match Arc::clone(&self.semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    // 信号量不会被关闭，出现时剩余消息交给可见性超时处理
                    error!("获取并发许可失败: {}", e);
                    break;
                }
            };
            let consumer = self.clone();
            workers.spawn(async move {
                let _permit = permit;
                consumer.process_contained(&message).await
            });
        }

        while let Some(result) = workers.join_next().await {
            match result {
                Ok((processed, panicked)) => {
                    match processed.outcome {
                        MessageOutcome::Sent => summary.sent += 1,
                        MessageOutcome::Failed { .. } => summary.failed += 1,
                    }
                    if panicked {
                        summary.panicked += 1;
                    }
                }
                Err(e) => {
                    // 失败路径本身异常，消息等待可见性超时后重新投递
                    summary.panicked += 1;
                    error!("消息处理任务异常退出: {}", e);
                }
            }
        }

        for campaign_id in &summary.campaigns {
            match self
                .campaigns
                .update_campaign_status(campaign_id, CampaignStatus::Completed)
                .await
            {
                Ok(()) => debug!(campaign_id = %campaign_id, "活动已标记为完成"),
                Err(e) => warn!(campaign_id = %campaign_id, "标记活动完成失败: {}", e),
            }
        }

        summary
    }

    /// 处理单条消息，所有错误都在内部消化
    #[instrument(skip_all, fields(ack_token = %message.ack_token, receive_count = message.receive_count))]
    pub async fn process_message(&self, message: &ReceivedMessage) -> ProcessedMessage {
        let decoded = match message.decode() {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("收到无法处理的消息: {}", e);
                let job_id = lenient_job_id(&message.body);
                return self.fail(job_id, message, e).await;
            }
        };
        let job_id = decoded.job_id.clone();

        if let Err(e) = self
            .jobs
            .update_job_status(&job_id, &JobStatusUpdate::queued())
            .await
        {
            warn!(job_id = %job_id, "标记任务为queued失败: {}", e);
        }

        let delivered = self
            .delivery
            .send(
                &decoded.recipient_email,
                &decoded.subject,
                &decoded.body,
                &decoded.data(),
            )
            .await;

        if let Err(e) = delivered {
            warn!(job_id = %job_id, "邮件发送失败: {}", e);
            return self.fail(Some(job_id), message, e).await;
        }

        if let Err(e) = self
            .jobs
            .update_job_status(&job_id, &JobStatusUpdate::sent())
            .await
        {
            error!(job_id = %job_id, "邮件已发送但记录sent状态失败: {}", e);
            return self.fail(Some(job_id), message, e).await;
        }

        let acknowledged = self.acknowledge(message).await;
        metrics::counter!("mailer_messages_total", "outcome" => "sent").increment(1);
        info!(job_id = %job_id, "邮件发送成功");

        ProcessedMessage {
            job_id: Some(job_id),
            outcome: MessageOutcome::Sent,
            acknowledged,
        }
    }

    /// 处理单条消息，panic时走失败路径，返回值的第二项表示是否发生过panic
    async fn process_contained(&self, message: &ReceivedMessage) -> (ProcessedMessage, bool) {
        match AssertUnwindSafe(self.process_message(message))
            .catch_unwind()
            .await
        {
            Ok(processed) => (processed, false),
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                error!(ack_token = %message.ack_token, "消息处理panic: {}", reason);
                metrics::counter!("mailer_messages_total", "outcome" => "panicked").increment(1);

                let job_id = lenient_job_id(&message.body);
                let error = MailerError::Internal(format!("消息处理panic: {reason}"));
                (self.fail(job_id, message, error).await, true)
            }
        }
    }

    async fn fail(
        &self,
        job_id: Option<String>,
        message: &ReceivedMessage,
        error: MailerError,
    ) -> ProcessedMessage {
        let reason = error.to_string();

        if let Some(job_id) = job_id.as_deref() {
            if let Err(e) = self
                .jobs
                .update_job_status(job_id, &JobStatusUpdate::failed(reason.clone()))
                .await
            {
                warn!(job_id = %job_id, "标记任务为failed失败: {}", e);
            }
        }

        let dead_lettered = match self.queue.dead_letter(&message.body, &reason).await {
            Ok(()) => true,
            Err(e) => {
                error!(job_id = ?job_id, "写入死信队列失败: {}", e);
                false
            }
        };

        let acknowledged = self.acknowledge(message).await;
        metrics::counter!("mailer_messages_total", "outcome" => "failed").increment(1);

        ProcessedMessage {
            job_id,
            outcome: MessageOutcome::Failed {
                reason,
                dead_lettered,
            },
            acknowledged,
        }
    }

    async fn acknowledge(&self, message: &ReceivedMessage) -> bool {
        match self.queue.acknowledge(&message.ack_token).await {
            Ok(()) => true,
            Err(e) => {
                warn!("确认消息失败，消息将被重新投递: {}", e);
                false
            }
        }
    }
}

/// 尽量从无效消息中取出任务ID，以便把任务标记为失败
fn lenient_job_id(body: &str) -> Option<String> {
    serde_json::from_str::<EmailJobMessage>(body)
        .ok()
        .map(|message| message.job_id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        (*reason).to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "未知panic".to_string()
    }
}

/// 后台消费循环的控制句柄
pub struct ConsumerHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    /// 发送停止信号，不等待循环退出
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 等待循环退出
    pub async fn join(self) -> MailerResult<()> {
        self.join
            .await
            .map_err(|e| MailerError::Internal(format!("消费循环任务异常退出: {e}")))
    }

    /// 停止并等待当前批次处理完成
    pub async fn shutdown(self) -> MailerResult<()> {
        self.stop();
        self.join().await
    }
}
