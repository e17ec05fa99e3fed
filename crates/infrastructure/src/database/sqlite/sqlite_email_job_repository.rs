use async_trait::async_trait;
use chrono::Utc;
use mailer_core::{
    CampaignStats, EmailJob, EmailJobRepository, JobStatus, JobStatusUpdate, MailerError,
    MailerResult,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::parse_json_object;

const JOB_COLUMNS: &str = "id, campaign_id, recipient_email, recipient_data, status, retry_count, \
                           error, sent_at, created_at, updated_at";

pub struct SqliteEmailJobRepository {
    pool: SqlitePool,
}

impl SqliteEmailJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> MailerResult<EmailJob> {
        let status: String = row.try_get("status")?;
        let recipient_data: String = row.try_get("recipient_data")?;
        Ok(EmailJob {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            recipient_email: row.try_get("recipient_email")?,
            recipient_data: parse_json_object(&recipient_data)?,
            status: status.parse()?,
            retry_count: row.try_get("retry_count")?,
            error: row.try_get("error")?,
            sent_at: row.try_get("sent_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl EmailJobRepository for SqliteEmailJobRepository {
    async fn get_job(&self, id: &str) -> MailerResult<Option<EmailJob>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM email_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM email_jobs WHERE campaign_id = $1 ORDER BY created_at, rowid"
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn list_pending_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM email_jobs WHERE campaign_id = $1 AND status = $2 \
             ORDER BY created_at, rowid"
        ))
        .bind(campaign_id)
        .bind(JobStatus::Pending.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }

    #[instrument(skip(self, update), fields(job_id = %id, status = %update.status))]
    async fn update_job_status(&self, id: &str, update: &JobStatusUpdate) -> MailerResult<()> {
        let now = Utc::now();
        let sent_at = (update.status == JobStatus::Sent).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = $1, error = $2, retry_count = COALESCE($3, retry_count),
                sent_at = $4, updated_at = $5
            WHERE id = $6
            "#,
        )
        .bind(update.status.as_str())
        .bind(&update.error)
        .bind(update.retry_count)
        .bind(sent_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailerError::JobNotFound { id: id.to_string() });
        }
        debug!("任务状态已更新");
        Ok(())
    }

    async fn mark_job_queued_if_pending(&self, id: &str) -> MailerResult<bool> {
        let result = sqlx::query(
            "UPDATE email_jobs SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(JobStatus::Queued.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_jobs_by_status(&self, campaign_id: &str) -> MailerResult<CampaignStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM email_jobs WHERE campaign_id = $1 GROUP BY status",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = CampaignStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let count = count.max(0) as u64;
            stats.total += count;
            match status.parse::<JobStatus>()? {
                JobStatus::Pending => stats.pending += count,
                JobStatus::Queued => stats.queued += count,
                JobStatus::Sent => stats.sent += count,
                JobStatus::Failed => stats.failed += count,
            }
        }
        Ok(stats)
    }

    #[instrument(skip(self), fields(campaign_id = %campaign_id))]
    async fn reset_failed_jobs(&self, campaign_id: &str) -> MailerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE email_jobs
            SET status = $1, retry_count = retry_count + 1, error = NULL, sent_at = NULL,
                updated_at = $2
            WHERE campaign_id = $3 AND status = $4 AND retry_count = 0
            "#,
        )
        .bind(JobStatus::Pending.as_str())
        .bind(Utc::now())
        .bind(campaign_id)
        .bind(JobStatus::Failed.as_str())
        .execute(&self.pool)
        .await?;

        debug!("已重置 {} 个失败任务", result.rows_affected());
        Ok(result.rows_affected())
    }
}
