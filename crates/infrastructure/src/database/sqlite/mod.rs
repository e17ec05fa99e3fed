pub mod sqlite_campaign_repository;
pub mod sqlite_email_job_repository;

pub use sqlite_campaign_repository::SqliteCampaignRepository;
pub use sqlite_email_job_repository::SqliteEmailJobRepository;

use std::str::FromStr;
use std::time::Duration;

use mailer_core::{config::DatabaseConfig, MailerError, MailerResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS campaigns (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS email_jobs (
        id TEXT PRIMARY KEY,
        campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
        recipient_email TEXT NOT NULL,
        recipient_data TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'pending',
        retry_count INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        sent_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_email_jobs_campaign_status ON email_jobs(campaign_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_campaigns_created_at ON campaigns(created_at)",
];

/// SQLite数据库管理器，负责连接池与表结构
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn new(config: &DatabaseConfig) -> MailerResult<Self> {
        config.validate()?;
        if config.url.contains(":memory:") {
            return Self::in_memory().await;
        }
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| MailerError::Configuration(format!("无效的数据库URL '{}': {e}", config.url)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        info!("已连接SQLite数据库: {}", config.url);
        let database = Self { pool };
        database.migrate().await?;
        Ok(database)
    }

    /// 单连接内存数据库，连接关闭即丢失数据
    pub async fn in_memory() -> MailerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let database = Self { pool };
        database.migrate().await?;
        Ok(database)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> MailerResult<()> {
        for statement in MIGRATIONS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> MailerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn campaign_repository(&self) -> SqliteCampaignRepository {
        SqliteCampaignRepository::new(self.pool.clone())
    }

    pub fn email_job_repository(&self) -> SqliteEmailJobRepository {
        SqliteEmailJobRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn parse_json_object(
    raw: &str,
) -> MailerResult<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::Null => Ok(serde_json::Map::new()),
        other => Err(MailerError::Serialization(format!(
            "个性化数据不是JSON对象: {other}"
        ))),
    }
}
