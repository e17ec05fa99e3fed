use std::sync::Arc;

use mailer_core::{EmailProvider, MailerError, MailerResult, OutboundEmail};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::template::render;

/// 投递客户端：渲染个性化内容并交给服务商发送
#[derive(Clone)]
pub struct DeliveryClient {
    provider: Arc<dyn EmailProvider>,
}

impl DeliveryClient {
    pub fn new(provider: Arc<dyn EmailProvider>) -> Self {
        Self { provider }
    }

    /// 渲染主题与正文
    pub fn compose(
        &self,
        recipient: &str,
        subject_template: &str,
        body_template: &str,
        data: &Map<String, Value>,
    ) -> OutboundEmail {
        OutboundEmail {
            to: recipient.to_string(),
            from: self.provider.from_address().to_string(),
            subject: render(subject_template, data),
            html: render(body_template, data),
        }
    }

    /// 发送一封邮件，服务商的任何失败都以 `Delivery` 返回，不做重试
    #[instrument(skip_all, fields(to = %recipient, provider = %self.provider.name()))]
    pub async fn send(
        &self,
        recipient: &str,
        subject_template: &str,
        body_template: &str,
        data: &Map<String, Value>,
    ) -> MailerResult<()> {
        let email = self.compose(recipient, subject_template, body_template, data);
        match self.provider.send(&email).await {
            Ok(()) => {
                debug!("邮件已发送");
                Ok(())
            }
            Err(MailerError::Delivery(reason)) => Err(MailerError::Delivery(reason)),
            Err(other) => Err(MailerError::Delivery(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::predicate::*;
    use serde_json::json;

    mock! {
        pub Provider {}

        #[async_trait]
        impl EmailProvider for Provider {
            fn name(&self) -> &str;
            fn from_address(&self) -> &str;
            async fn send(&self, email: &OutboundEmail) -> MailerResult<()>;
        }
    }

    fn provider() -> MockProvider {
        let mut provider = MockProvider::new();
        provider.expect_name().return_const("mock".to_string());
        provider
            .expect_from_address()
            .return_const("noreply@example.com".to_string());
        provider
    }

    #[tokio::test]
    async fn test_send_renders_subject_and_body() {
        let mut provider = provider();
        provider
            .expect_send()
            .with(eq(OutboundEmail {
                to: "a@x.com".to_string(),
                from: "noreply@example.com".to_string(),
                subject: "Hello A".to_string(),
                html: "<p>Hi A</p>".to_string(),
            }))
            .times(1)
            .returning(|_| Ok(()));

        let client = DeliveryClient::new(Arc::new(provider));
        let data = json!({"name": "A"}).as_object().cloned().unwrap();
        client
            .send("a@x.com", "Hello {{name}}", "<p>Hi {{name}}</p>", &data)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_provider_failure_surfaces_as_delivery_error() {
        let mut provider = provider();
        provider
            .expect_send()
            .times(1)
            .returning(|_| Err(MailerError::Delivery("403 Forbidden".to_string())));

        let client = DeliveryClient::new(Arc::new(provider));
        let err = client
            .send("a@x.com", "s", "b", &Map::new())
            .await
            .unwrap_err();
        match err {
            MailerError::Delivery(reason) => assert_eq!(reason, "403 Forbidden"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_delivery_errors_are_wrapped() {
        let mut provider = provider();
        provider
            .expect_send()
            .returning(|_| Err(MailerError::Internal("socket closed".to_string())));

        let client = DeliveryClient::new(Arc::new(provider));
        let err = client.send("a@x.com", "s", "b", &Map::new()).await.unwrap_err();
        assert!(matches!(err, MailerError::Delivery(ref m) if m.contains("socket closed")));
    }
}
