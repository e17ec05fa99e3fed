use thiserror::Error;

/// 邮件投递系统错误类型定义
#[derive(Debug, Error)]
pub enum MailerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("存储操作错误: {0}")]
    Store(String),

    #[error("活动未找到: {id}")]
    CampaignNotFound { id: String },

    #[error("邮件任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("状态不允许该操作: {0}")]
    InvalidState(String),

    #[error("消息队列不可用: {0}")]
    QueueUnavailable(String),

    #[error("消息校验失败: {0}")]
    Validation(String),

    #[error("邮件投递失败: {0}")]
    Delivery(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl MailerError {
    /// 是否为基础设施层面的暂时性错误
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MailerError::QueueUnavailable(_) | MailerError::Database(_) | MailerError::Store(_)
        )
    }
}

impl From<serde_json::Error> for MailerError {
    fn from(e: serde_json::Error) -> Self {
        MailerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type MailerResult<T> = std::result::Result<T, MailerError>;
