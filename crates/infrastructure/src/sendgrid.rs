use std::time::Duration;

use async_trait::async_trait;
use mailer_core::{
    config::DeliveryConfig, EmailProvider, MailerError, MailerResult, OutboundEmail,
};
use serde::Serialize;
use tracing::{debug, warn};

const SEND_PATH: &str = "/v3/mail/send";

/// SendGrid v3 邮件发送接口
pub struct SendGridProvider {
    client: reqwest::Client,
    api_key: String,
    from_email: String,
    endpoint: String,
}

#[derive(Debug, Serialize)]
struct MailSendRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: Address<'a>,
    subject: &'a str,
    content: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<Address<'a>>,
}

#[derive(Debug, Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

impl SendGridProvider {
    /// API Key或发件人缺失时返回 `Configuration` 错误
    pub fn new(config: &DeliveryConfig) -> MailerResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| MailerError::Configuration(format!("创建HTTP客户端失败: {e}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            from_email: config.from_email.clone(),
            endpoint: format!("{}{SEND_PATH}", config.api_base_url.trim_end_matches('/')),
        })
    }

    fn build_request(email: &OutboundEmail) -> MailSendRequest<'_> {
        MailSendRequest {
            personalizations: vec![Personalization {
                to: vec![Address { email: &email.to }],
            }],
            from: Address { email: &email.from },
            subject: &email.subject,
            content: vec![Content {
                content_type: "text/html",
                value: &email.html,
            }],
        }
    }
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    fn name(&self) -> &str {
        "sendgrid"
    }

    fn from_address(&self) -> &str {
        &self.from_email
    }

    async fn send(&self, email: &OutboundEmail) -> MailerResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Self::build_request(email))
            .send()
            .await
            .map_err(|e| MailerError::Delivery(format!("请求SendGrid失败: {e}")))?;

        let status = response.status();
        if status.is_success() {
            debug!(to = %email.to, status = %status, "SendGrid已接受邮件");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(to = %email.to, status = %status, "SendGrid拒绝邮件");
        Err(MailerError::Delivery(format!(
            "SendGrid返回 {status}: {body}"
        )))
    }
}
