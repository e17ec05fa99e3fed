//! 存储层抽象接口
//!
//! 活动与邮件任务的持久化接口。投递流程只通过这里定义的操作读写状态，
//! 具体实现见 `mailer-infrastructure` 中的 SQLite 与内存实现。

use async_trait::async_trait;

use crate::{
    models::{Campaign, CampaignStats, CampaignStatus, EmailJob, JobStatusUpdate},
    MailerResult,
};

/// 活动仓储接口
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    /// 创建活动及其全部任务
    ///
    /// 活动与任务在同一个存储操作中写入，任意一条失败时都不落库。
    async fn create_with_jobs(&self, campaign: &Campaign, jobs: &[EmailJob]) -> MailerResult<()>;

    /// 根据ID获取活动
    async fn get_campaign(&self, id: &str) -> MailerResult<Option<Campaign>>;

    /// 按创建时间倒序列出全部活动
    async fn list_campaigns(&self) -> MailerResult<Vec<Campaign>>;

    /// 更新活动状态
    ///
    /// # 错误
    ///
    /// * `CampaignNotFound` - 活动不存在
    async fn update_campaign_status(&self, id: &str, status: CampaignStatus) -> MailerResult<()>;

    /// 仅当活动处于 `from` 状态时改为 `to`
    ///
    /// 返回是否发生了状态变更；活动不存在或状态已被其他流程推进时返回 `false`。
    async fn transition_campaign_status(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> MailerResult<bool>;
}

/// 邮件任务仓储接口
#[async_trait]
pub trait EmailJobRepository: Send + Sync {
    /// 根据ID获取任务
    async fn get_job(&self, id: &str) -> MailerResult<Option<EmailJob>>;

    /// 按创建时间顺序列出活动下的全部任务
    async fn list_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>>;

    /// 列出活动下处于 `pending` 状态的任务
    async fn list_pending_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>>;

    /// 更新任务状态
    ///
    /// 目标状态为 `sent` 时写入 `sent_at`，其他状态清空 `sent_at`。
    ///
    /// # 错误
    ///
    /// * `JobNotFound` - 任务不存在
    async fn update_job_status(&self, id: &str, update: &JobStatusUpdate) -> MailerResult<()>;

    /// 仅当任务仍为 `pending` 时标记为 `queued`
    ///
    /// 返回是否发生了状态变更。消费者可能在入队后立即处理任务，
    /// 已被推进到 `sent` 或 `failed` 的任务不会被改回 `queued`。
    async fn mark_job_queued_if_pending(&self, id: &str) -> MailerResult<bool>;

    /// 统计活动下各状态的任务数量
    async fn count_jobs_by_status(&self, campaign_id: &str) -> MailerResult<CampaignStats>;

    /// 将未重试过的失败任务重置为 `pending`
    ///
    /// 只影响 `failed` 且 `retry_count = 0` 的任务，重试次数加一并清空错误。
    /// 返回被重置的任务数量；重复调用不会再次影响同一任务。
    async fn reset_failed_jobs(&self, campaign_id: &str) -> MailerResult<u64>;
}
