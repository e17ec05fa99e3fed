use async_trait::async_trait;

use crate::{
    models::{AckToken, EmailJobMessage, ReceivedMessage},
    MailerResult,
};

/// 投递队列抽象接口
///
/// 主队列保存待投递的任务消息，死信队列保存永久失败的消息以便人工排查或重放。
/// 队列只提供至少一次投递语义：接收后未确认的消息会在可见性超时后重新可见。
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// 发布消息到主队列
    async fn enqueue(&self, message: &EmailJobMessage) -> MailerResult<()>;

    /// 长轮询接收一批消息，超时无消息时返回空列表
    async fn receive_batch(&self) -> MailerResult<Vec<ReceivedMessage>>;

    /// 永久删除消息，只能在任务得到最终结论后调用
    async fn acknowledge(&self, ack_token: &AckToken) -> MailerResult<()>;

    /// 将原始消息体连同错误原因写入死信队列
    async fn dead_letter(&self, body: &str, reason: &str) -> MailerResult<()>;
}
