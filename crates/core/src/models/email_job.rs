use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MailerError, MailerResult};

use super::Recipient;

/// 单个收件人的投递任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmailJob {
    pub id: String,
    pub campaign_id: String,
    pub recipient_email: String,
    pub recipient_data: serde_json::Map<String, serde_json::Value>,
    pub status: JobStatus,
    pub retry_count: i32,
    pub error: Option<String>,
    /// 仅当状态为 `Sent` 时非空
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Sent,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Sent => "sent",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Sent | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = MailerError;

    fn from_str(s: &str) -> MailerResult<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "queued" => Ok(JobStatus::Queued),
            "sent" => Ok(JobStatus::Sent),
            "failed" => Ok(JobStatus::Failed),
            other => Err(MailerError::Serialization(format!(
                "未知的任务状态: {other}"
            ))),
        }
    }
}

/// 任务状态更新
///
/// `error` 会覆盖已有的错误信息（`None` 即清空）；`retry_count` 为 `None`
/// 时保持原值。`sent_at` 由存储层根据目标状态维护。
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusUpdate {
    pub status: JobStatus,
    pub error: Option<String>,
    pub retry_count: Option<i32>,
}

impl JobStatusUpdate {
    pub fn queued() -> Self {
        Self {
            status: JobStatus::Queued,
            error: None,
            retry_count: None,
        }
    }

    pub fn sent() -> Self {
        Self {
            status: JobStatus::Sent,
            error: None,
            retry_count: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.into()),
            retry_count: None,
        }
    }
}

impl EmailJob {
    /// 为收件人创建待处理任务
    pub fn pending(campaign_id: &str, recipient: &Recipient) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id: campaign_id.to_string(),
            recipient_email: recipient.email.trim().to_string(),
            recipient_data: recipient.data.clone(),
            status: JobStatus::Pending,
            retry_count: 0,
            error: None,
            sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// 应用状态更新，保持 `sent_at` 与状态一致
    pub fn apply(&mut self, update: &JobStatusUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        self.error = update.error.clone();
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        self.sent_at = if update.status == JobStatus::Sent {
            Some(now)
        } else {
            None
        };
        self.updated_at = now;
    }

    /// 失败任务是否允许人工重试（每个任务只允许一次）
    pub fn is_retryable(&self) -> bool {
        self.status == JobStatus::Failed && self.retry_count == 0
    }

    /// 重置为待处理状态，重试次数加一并清空错误
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.retry_count += 1;
        self.error = None;
        self.sent_at = None;
        self.updated_at = now;
    }
}
