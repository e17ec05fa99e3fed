use async_trait::async_trait;
use chrono::Utc;
use mailer_core::{
    Campaign, CampaignRepository, CampaignStatus, EmailJob, MailerError, MailerResult,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

pub struct SqliteCampaignRepository {
    pool: SqlitePool,
}

impl SqliteCampaignRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_campaign(row: &sqlx::sqlite::SqliteRow) -> MailerResult<Campaign> {
        let status: String = row.try_get("status")?;
        let metadata: String = row.try_get("metadata")?;
        Ok(Campaign {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            subject: row.try_get("subject")?,
            body: row.try_get("body")?,
            status: status.parse()?,
            metadata: serde_json::from_str(&metadata)?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl CampaignRepository for SqliteCampaignRepository {
    #[instrument(skip(self, campaign, jobs), fields(campaign_id = %campaign.id, jobs = jobs.len()))]
    async fn create_with_jobs(&self, campaign: &Campaign, jobs: &[EmailJob]) -> MailerResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO campaigns (id, name, subject, body, status, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&campaign.id)
        .bind(&campaign.name)
        .bind(&campaign.subject)
        .bind(&campaign.body)
        .bind(campaign.status.as_str())
        .bind(serde_json::to_string(&campaign.metadata)?)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&mut *tx)
        .await?;

        for job in jobs {
            sqlx::query(
                r#"
                INSERT INTO email_jobs (id, campaign_id, recipient_email, recipient_data, status,
                                        retry_count, error, sent_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(&job.id)
            .bind(&job.campaign_id)
            .bind(&job.recipient_email)
            .bind(serde_json::to_string(&job.recipient_data)?)
            .bind(job.status.as_str())
            .bind(job.retry_count)
            .bind(&job.error)
            .bind(job.sent_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("活动及 {} 个任务已写入", jobs.len());
        Ok(())
    }

    async fn get_campaign(&self, id: &str) -> MailerResult<Option<Campaign>> {
        let row = sqlx::query(
            "SELECT id, name, subject, body, status, metadata, created_at, updated_at
             FROM campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_campaign).transpose()
    }

    async fn list_campaigns(&self) -> MailerResult<Vec<Campaign>> {
        let rows = sqlx::query(
            "SELECT id, name, subject, body, status, metadata, created_at, updated_at
             FROM campaigns ORDER BY created_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_campaign).collect()
    }

    async fn update_campaign_status(&self, id: &str, status: CampaignStatus) -> MailerResult<()> {
        let result = sqlx::query("UPDATE campaigns SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(MailerError::CampaignNotFound { id: id.to_string() });
        }
        debug!(campaign_id = %id, status = %status, "活动状态已更新");
        Ok(())
    }

    async fn transition_campaign_status(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> MailerResult<bool> {
        let result = sqlx::query(
            "UPDATE campaigns SET status = $1, updated_at = $2 WHERE id = $3 AND status = $4",
        )
        .bind(to.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        let changed = result.rows_affected() > 0;
        debug!(campaign_id = %id, from = %from, to = %to, changed, "活动状态条件更新");
        Ok(changed)
    }
}
