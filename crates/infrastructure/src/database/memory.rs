use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use mailer_core::{
    Campaign, CampaignRepository, CampaignStats, CampaignStatus, EmailJob, EmailJobRepository,
    JobStatus, JobStatusUpdate, MailerError, MailerResult,
};
use tokio::sync::RwLock;

/// 内存存储，同时实现活动与任务仓储接口
///
/// 用于嵌入式运行和测试，进程退出即丢失数据。
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    campaigns: Vec<Campaign>,
    jobs: Vec<EmailJob>,
    job_index: HashMap<String, usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部任务的快照
    pub async fn jobs(&self) -> Vec<EmailJob> {
        self.inner.read().await.jobs.clone()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryStore {
    async fn create_with_jobs(&self, campaign: &Campaign, jobs: &[EmailJob]) -> MailerResult<()> {
        let mut state = self.inner.write().await;
        if state.campaigns.iter().any(|c| c.id == campaign.id) {
            return Err(MailerError::Store(format!("活动ID已存在: {}", campaign.id)));
        }
        let mut seen = std::collections::HashSet::new();
        for job in jobs {
            if state.job_index.contains_key(&job.id) || !seen.insert(job.id.as_str()) {
                return Err(MailerError::Store(format!("任务ID已存在: {}", job.id)));
            }
        }

        state.campaigns.push(campaign.clone());
        for job in jobs {
            let index = state.jobs.len();
            state.job_index.insert(job.id.clone(), index);
            state.jobs.push(job.clone());
        }
        Ok(())
    }

    async fn get_campaign(&self, id: &str) -> MailerResult<Option<Campaign>> {
        let state = self.inner.read().await;
        Ok(state.campaigns.iter().find(|c| c.id == id).cloned())
    }

    async fn list_campaigns(&self) -> MailerResult<Vec<Campaign>> {
        let state = self.inner.read().await;
        let mut campaigns = state.campaigns.clone();
        campaigns.reverse();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn update_campaign_status(&self, id: &str, status: CampaignStatus) -> MailerResult<()> {
        let mut state = self.inner.write().await;
        let campaign = state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| MailerError::CampaignNotFound { id: id.to_string() })?;
        campaign.status = status;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_campaign_status(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> MailerResult<bool> {
        let mut state = self.inner.write().await;
        match state
            .campaigns
            .iter_mut()
            .find(|c| c.id == id && c.status == from)
        {
            Some(campaign) => {
                campaign.status = to;
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl EmailJobRepository for InMemoryStore {
    async fn get_job(&self, id: &str) -> MailerResult<Option<EmailJob>> {
        let state = self.inner.read().await;
        Ok(state.job_index.get(id).map(|&i| state.jobs[i].clone()))
    }

    async fn list_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>> {
        let state = self.inner.read().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn list_pending_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>> {
        let state = self.inner.read().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.campaign_id == campaign_id && j.status == JobStatus::Pending)
            .cloned()
            .collect())
    }

    async fn update_job_status(&self, id: &str, update: &JobStatusUpdate) -> MailerResult<()> {
        let mut state = self.inner.write().await;
        let index = *state
            .job_index
            .get(id)
            .ok_or_else(|| MailerError::JobNotFound { id: id.to_string() })?;
        state.jobs[index].apply(update, Utc::now());
        Ok(())
    }

    async fn mark_job_queued_if_pending(&self, id: &str) -> MailerResult<bool> {
        let mut state = self.inner.write().await;
        let Some(&index) = state.job_index.get(id) else {
            return Ok(false);
        };
        let job = &mut state.jobs[index];
        if job.status != JobStatus::Pending {
            return Ok(false);
        }
        job.apply(&JobStatusUpdate::queued(), Utc::now());
        Ok(true)
    }

    async fn count_jobs_by_status(&self, campaign_id: &str) -> MailerResult<CampaignStats> {
        let state = self.inner.read().await;
        let mut stats = CampaignStats::default();
        for job in state.jobs.iter().filter(|j| j.campaign_id == campaign_id) {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Sent => stats.sent += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn reset_failed_jobs(&self, campaign_id: &str) -> MailerResult<u64> {
        let mut state = self.inner.write().await;
        let now = Utc::now();
        let mut reset = 0;
        for job in state
            .jobs
            .iter_mut()
            .filter(|j| j.campaign_id == campaign_id && j.is_retryable())
        {
            job.reset_for_retry(now);
            reset += 1;
        }
        Ok(reset)
    }
}
