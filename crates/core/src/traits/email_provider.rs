use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::MailerResult;

/// 交给投递服务商的完整邮件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html: String,
}

/// 事务邮件服务商接口
///
/// 任何非成功响应或传输错误都以 `MailerError::Delivery` 返回，实现内部不做重试。
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// 服务商名称，用于日志
    fn name(&self) -> &str;

    /// 发件人地址
    fn from_address(&self) -> &str;

    async fn send(&self, email: &OutboundEmail) -> MailerResult<()>;
}
