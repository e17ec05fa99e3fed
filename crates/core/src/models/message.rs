use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MailerError, MailerResult};

use super::{Campaign, EmailJob};

/// 队列中的投递消息，一条消息对应一个任务
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmailJobMessage {
    #[serde(default)]
    pub campaign_id: String,
    #[serde(default)]
    pub job_id: String,
    #[serde(default)]
    pub recipient_email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl EmailJobMessage {
    pub fn for_job(campaign: &Campaign, job: &EmailJob) -> Self {
        Self {
            campaign_id: job.campaign_id.clone(),
            job_id: job.id.clone(),
            recipient_email: job.recipient_email.clone(),
            subject: campaign.subject.clone(),
            body: campaign.body.clone(),
            recipient_data: Some(job.recipient_data.clone()),
        }
    }

    pub fn encode(&self) -> MailerResult<String> {
        serde_json::to_string(self)
            .map_err(|e| MailerError::Serialization(format!("序列化投递消息失败: {e}")))
    }

    /// 解码并校验消息体，任务ID与收件人缺失时视为毒消息
    pub fn decode(body: &str) -> MailerResult<Self> {
        let message: Self = serde_json::from_str(body)
            .map_err(|e| MailerError::Validation(format!("消息体不是合法的投递消息: {e}")))?;
        message.validate()?;
        Ok(message)
    }

    pub fn validate(&self) -> MailerResult<()> {
        if self.job_id.trim().is_empty() {
            return Err(MailerError::Validation("消息缺少 jobId".to_string()));
        }
        if self.recipient_email.trim().is_empty() {
            return Err(MailerError::Validation("消息缺少 recipientEmail".to_string()));
        }
        Ok(())
    }

    /// 个性化数据，缺省时为空
    pub fn data(&self) -> serde_json::Map<String, serde_json::Value> {
        self.recipient_data.clone().unwrap_or_default()
    }

    pub fn campaign_id(&self) -> Option<&str> {
        let id = self.campaign_id.trim();
        (!id.is_empty()).then_some(id)
    }
}

/// 消息确认凭据，由队列在接收时签发，只在可见性超时前有效
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(String);

impl AckToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 从主队列接收到的原始消息
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub body: String,
    pub ack_token: AckToken,
    /// 该消息已被投递的次数（含本次）
    pub receive_count: u32,
}

impl ReceivedMessage {
    pub fn decode(&self) -> MailerResult<EmailJobMessage> {
        EmailJobMessage::decode(&self.body)
    }
}

/// 死信消息：原始载荷加错误信息和时间戳
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeadLetterMessage {
    #[serde(flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterMessage {
    /// 由原始消息体构造死信，非JSON对象的消息体以 `rawBody` 字段保留
    pub fn from_raw(body: &str, reason: &str) -> Self {
        let mut payload = match serde_json::from_str::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => {
                let mut map = serde_json::Map::new();
                map.insert(
                    "rawBody".to_string(),
                    serde_json::Value::String(body.to_string()),
                );
                map
            }
        };
        payload.remove("error");
        payload.remove("timestamp");

        let error = if reason.trim().is_empty() {
            "unknown error".to_string()
        } else {
            reason.to_string()
        };

        Self {
            payload,
            error,
            timestamp: Utc::now(),
        }
    }

    pub fn encode(&self) -> MailerResult<String> {
        serde_json::to_string(self)
            .map_err(|e| MailerError::Serialization(format!("序列化死信消息失败: {e}")))
    }

    pub fn job_id(&self) -> Option<&str> {
        self.payload.get("jobId").and_then(|v| v.as_str())
    }
}
