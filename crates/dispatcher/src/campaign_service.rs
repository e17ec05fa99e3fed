use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use mailer_core::{
    Campaign, CampaignRepository, CampaignStats, CampaignStatus, EmailJob, EmailJobMessage,
    EmailJobRepository, MailerError, MailerResult, NewCampaign, QueueClient,
};

/// 活动启动结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartReport {
    pub campaign_id: String,
    /// 本次写入队列的消息数
    pub enqueued: usize,
}

/// 活动管理接口
#[async_trait]
pub trait CampaignOperations: Send + Sync {
    /// 创建草稿活动，并为每个收件人创建一个待处理任务
    async fn create_campaign(&self, input: NewCampaign) -> MailerResult<Campaign>;

    /// 启动活动：为每个待处理任务写入一条队列消息
    ///
    /// # 错误
    ///
    /// * `CampaignNotFound` - 活动不存在
    /// * `InvalidState` - 活动不是草稿状态
    /// * `QueueUnavailable` - 写入队列失败，活动保持草稿状态
    async fn start_campaign(&self, campaign_id: &str) -> MailerResult<StartReport>;

    async fn get_campaign(&self, campaign_id: &str) -> MailerResult<Campaign>;

    async fn list_campaigns(&self) -> MailerResult<Vec<Campaign>>;

    async fn list_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>>;

    async fn get_job(&self, job_id: &str) -> MailerResult<EmailJob>;

    async fn campaign_stats(&self, campaign_id: &str) -> MailerResult<CampaignStats>;

    /// 把首次失败的任务重置为待处理，返回重置数量
    ///
    /// 只修改状态，不会重新写入队列。
    async fn retry_failed_jobs(&self, campaign_id: &str) -> MailerResult<u64>;
}

/// 活动服务实现
///
/// 只有启动活动需要消息队列，查询、创建和重试只访问存储。
pub struct CampaignService {
    campaigns: Arc<dyn CampaignRepository>,
    jobs: Arc<dyn EmailJobRepository>,
    queue: Option<Arc<dyn QueueClient>>,
}

impl CampaignService {
    pub fn new(campaigns: Arc<dyn CampaignRepository>, jobs: Arc<dyn EmailJobRepository>) -> Self {
        Self {
            campaigns,
            jobs,
            queue: None,
        }
    }

    /// 设置启动活动时使用的消息队列
    pub fn with_queue(mut self, queue: Arc<dyn QueueClient>) -> Self {
        self.queue = Some(queue);
        self
    }

    async fn require_campaign(&self, campaign_id: &str) -> MailerResult<Campaign> {
        self.campaigns
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| MailerError::CampaignNotFound {
                id: campaign_id.to_string(),
            })
    }
}

#[async_trait]
impl CampaignOperations for CampaignService {
    #[instrument(skip_all, fields(name = %input.name, recipients = input.recipients.len()))]
    async fn create_campaign(&self, input: NewCampaign) -> MailerResult<Campaign> {
        input.validate()?;

        let campaign = Campaign::draft(&input);
        let jobs: Vec<EmailJob> = input
            .recipients
            .iter()
            .map(|recipient| EmailJob::pending(&campaign.id, recipient))
            .collect();

        self.campaigns.create_with_jobs(&campaign, &jobs).await?;
        info!(campaign_id = %campaign.id, "创建活动成功，任务数: {}", jobs.len());
        Ok(campaign)
    }

    #[instrument(skip(self))]
    async fn start_campaign(&self, campaign_id: &str) -> MailerResult<StartReport> {
        let queue = self.queue.as_ref().ok_or_else(|| {
            MailerError::QueueUnavailable("未配置消息队列，无法启动活动".to_string())
        })?;
        let campaign = self.require_campaign(campaign_id).await?;
        if !campaign.status.can_start() {
            return Err(MailerError::InvalidState(format!(
                "活动 {} 当前状态为 {}，只有草稿状态可以启动",
                campaign.id, campaign.status
            )));
        }

        let pending = self.jobs.list_pending_jobs(campaign_id).await?;
        info!("开始投递活动，待处理任务数: {}", pending.len());

        let mut enqueued = 0;
        for job in &pending {
            let message = EmailJobMessage::for_job(&campaign, job);
            if let Err(e) = queue.enqueue(&message).await {
                warn!(
                    job_id = %job.id,
                    "写入队列失败，已写入 {}/{} 条，活动保持草稿状态: {}",
                    enqueued,
                    pending.len(),
                    e
                );
                return Err(match e {
                    MailerError::QueueUnavailable(_) => e,
                    other => MailerError::QueueUnavailable(other.to_string()),
                });
            }
            metrics::counter!("mailer_enqueued_total").increment(1);
            enqueued += 1;

            // 消费者可能已经处理完这条消息，只推进仍为 pending 的任务
            if self.jobs.mark_job_queued_if_pending(&job.id).await? {
                debug!(job_id = %job.id, "任务已入队");
            } else {
                debug!(job_id = %job.id, "任务已被消费者处理，保留当前状态");
            }
        }

        let started = self
            .campaigns
            .transition_campaign_status(campaign_id, CampaignStatus::Draft, CampaignStatus::Queued)
            .await?;
        if started {
            info!("活动已启动，入队消息数: {}", enqueued);
        } else {
            info!("活动状态已被消费者推进，入队消息数: {}", enqueued);
        }

        Ok(StartReport {
            campaign_id: campaign.id,
            enqueued,
        })
    }

    async fn get_campaign(&self, campaign_id: &str) -> MailerResult<Campaign> {
        self.require_campaign(campaign_id).await
    }

    async fn list_campaigns(&self) -> MailerResult<Vec<Campaign>> {
        self.campaigns.list_campaigns().await
    }

    async fn list_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>> {
        self.require_campaign(campaign_id).await?;
        self.jobs.list_jobs(campaign_id).await
    }

    async fn get_job(&self, job_id: &str) -> MailerResult<EmailJob> {
        self.jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| MailerError::JobNotFound {
                id: job_id.to_string(),
            })
    }

    async fn campaign_stats(&self, campaign_id: &str) -> MailerResult<CampaignStats> {
        self.require_campaign(campaign_id).await?;
        self.jobs.count_jobs_by_status(campaign_id).await
    }

    #[instrument(skip(self))]
    async fn retry_failed_jobs(&self, campaign_id: &str) -> MailerResult<u64> {
        self.require_campaign(campaign_id).await?;
        let reset = self.jobs.reset_failed_jobs(campaign_id).await?;
        info!("已重置 {} 个失败任务为待处理", reset);
        Ok(reset)
    }
}
