use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MailerError, MailerResult};

/// 邮件活动
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    /// 主题模板，可包含 `{{key}}` 占位符
    pub subject: String,
    /// 正文模板（HTML），可包含 `{{key}}` 占位符
    pub body: String,
    pub status: CampaignStatus,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 活动状态
///
/// `Sending` 与 `Failed` 可以被持久化和读取，但当前的投递流程不会写入它们。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Queued,
    Sending,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Queued => "queued",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
        }
    }

    /// 只有草稿状态的活动可以启动
    pub fn can_start(&self) -> bool {
        matches!(self, CampaignStatus::Draft)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = MailerError;

    fn from_str(s: &str) -> MailerResult<Self> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "queued" => Ok(CampaignStatus::Queued),
            "sending" => Ok(CampaignStatus::Sending),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            other => Err(MailerError::Serialization(format!(
                "未知的活动状态: {other}"
            ))),
        }
    }
}

/// 收件人，创建活动时提供
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    pub email: String,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Recipient {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            data: serde_json::Map::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// 创建活动的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

impl NewCampaign {
    /// 校验活动输入，收件人地址必须非空且包含 `@`
    pub fn validate(&self) -> MailerResult<()> {
        if self.name.trim().is_empty() {
            return Err(MailerError::Validation("活动名称不能为空".to_string()));
        }
        if self.subject.trim().is_empty() {
            return Err(MailerError::Validation("邮件主题不能为空".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(MailerError::Validation("邮件正文不能为空".to_string()));
        }
        for (index, recipient) in self.recipients.iter().enumerate() {
            let email = recipient.email.trim();
            if email.is_empty() || !email.contains('@') {
                return Err(MailerError::Validation(format!(
                    "第 {} 个收件人地址无效: '{}'",
                    index + 1,
                    recipient.email
                )));
            }
        }
        Ok(())
    }
}

impl Campaign {
    /// 由输入构造草稿状态的活动
    pub fn draft(input: &NewCampaign) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: input.name.clone(),
            subject: input.subject.clone(),
            body: input.body.clone(),
            status: CampaignStatus::Draft,
            metadata: input
                .metadata
                .clone()
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            created_at: now,
            updated_at: now,
        }
    }
}

/// 活动下各状态任务数量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub total: u64,
    pub pending: u64,
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
}
