use std::collections::HashMap;
use std::time::{Duration, Instant};

use mailer_core::{MailerError, MailerResult};
use redis::streams::{StreamAutoClaimReply, StreamId, StreamReadReply};
use tracing::{debug, warn};

use super::connection_manager::RedisConnectionManager;

/// 消息体在Stream条目中的字段名
pub const BODY_FIELD: &str = "body";

/// 从Stream中读出的一条条目
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub body: Option<String>,
    pub delivery_count: u32,
    /// `delivery_count` 是否来自 `XPENDING`，认领后查询失败时为估计值
    pub delivery_count_known: bool,
}

/// 消费者组中一个待确认条目的归属
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub consumer: String,
    pub delivery_count: u32,
}

/// 对单个Stream及其消费者组的底层命令封装
pub struct RedisStreamOperations {
    connection_manager: RedisConnectionManager,
    stream: String,
    group: String,
    consumer: String,
}

impl RedisStreamOperations {
    pub fn new(
        connection_manager: RedisConnectionManager,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Self {
            connection_manager,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    pub async fn ensure_consumer_group_exists(&self) -> MailerResult<()> {
        debug!(
            "Ensuring consumer group exists: {} for stream: {}",
            self.group, self.stream
        );

        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(&self.stream)
            .arg(&self.group)
            .arg("0") // 从Stream开始读取
            .arg("MKSTREAM"); // 如果Stream不存在则创建

        match self.connection_manager.execute_command::<String>(&cmd).await {
            Ok(_) => {
                debug!("Successfully created consumer group: {}", self.group);
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group {} already exists", self.group);
                Ok(())
            }
            Err(e) => Err(MailerError::QueueUnavailable(format!(
                "Failed to create consumer group {}: {e}",
                self.group
            ))),
        }
    }

    pub async fn add(&self, body: &str) -> MailerResult<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream).arg("*").arg(BODY_FIELD).arg(body);
        let id: String = self.connection_manager.execute_command(&cmd).await?;
        debug!("Added entry {} to stream {}", id, self.stream);
        Ok(id)
    }

    /// 认领空闲时间超过 `min_idle` 的待确认条目
    pub async fn auto_claim(&self, min_idle: Duration, count: usize) -> MailerResult<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XAUTOCLAIM");
        cmd.arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count);

        let reply: StreamAutoClaimReply = self.connection_manager.execute_command(&cmd).await?;
        if !reply.deleted_ids.is_empty() {
            debug!(
                "{} pending entries in {} were deleted before reclaim",
                reply.deleted_ids.len(),
                self.stream
            );
        }
        if reply.claimed.is_empty() {
            return Ok(Vec::new());
        }

        let delivery_counts = self.delivery_counts(&reply.claimed).await;
        Ok(reply
            .claimed
            .iter()
            .map(|entry| match delivery_counts.get(&entry.id) {
                Some(&delivery_count) => to_stream_entry(entry, delivery_count, true),
                None => to_stream_entry(entry, 2, false),
            })
            .collect())
    }

    /// 非阻塞读取从未投递过的新条目
    pub async fn read_new(&self, count: usize) -> MailerResult<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">");

        let reply: Option<StreamReadReply> = self.connection_manager.execute_command(&cmd).await?;
        Ok(reply
            .map(|reply| {
                reply
                    .keys
                    .iter()
                    .flat_map(|key| key.ids.iter())
                    .map(|entry| to_stream_entry(entry, 1, true))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// 确认并删除条目，返回被确认的条目数
    pub async fn ack_and_delete(&self, id: &str) -> MailerResult<i64> {
        let start = Instant::now();
        let mut ack = redis::cmd("XACK");
        ack.arg(&self.stream).arg(&self.group).arg(id);
        let acked: i64 = self.connection_manager.execute_command(&ack).await?;

        if acked > 0 {
            let mut del = redis::cmd("XDEL");
            del.arg(&self.stream).arg(id);
            let _: i64 = self.connection_manager.execute_command(&del).await?;
            debug!("Acknowledged entry {} in {:?}", id, start.elapsed());
        } else {
            warn!(
                "Entry {} was not acknowledged (possibly already processed)",
                id
            );
        }
        Ok(acked)
    }

    /// 查询单个待确认条目的当前持有者和投递次数，条目不在待确认列表中时返回 `None`
    pub async fn pending_entry(&self, id: &str) -> MailerResult<Option<PendingEntry>> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(&self.stream)
            .arg(&self.group)
            .arg(id)
            .arg(id)
            .arg(1);

        let pending: Vec<(String, String, u64, u32)> =
            self.connection_manager.execute_command(&cmd).await?;
        Ok(pending
            .into_iter()
            .find(|(pending_id, ..)| pending_id == id)
            .map(|(_, consumer, _, delivery_count)| PendingEntry {
                consumer,
                delivery_count,
            }))
    }

    pub async fn len(&self) -> MailerResult<u64> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(&self.stream);
        self.connection_manager.execute_command(&cmd).await
    }

    async fn delivery_counts(&self, entries: &[StreamId]) -> HashMap<String, u32> {
        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return HashMap::new();
        };

        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(&self.stream)
            .arg(&self.group)
            .arg(&first.id)
            .arg(&last.id)
            .arg(entries.len())
            .arg(&self.consumer);

        match self
            .connection_manager
            .execute_command::<Vec<(String, String, u64, u32)>>(&cmd)
            .await
        {
            Ok(pending) => pending
                .into_iter()
                .map(|(id, _, _, deliveries)| (id, deliveries))
                .collect(),
            Err(e) => {
                warn!("Failed to read delivery counts for {}: {}", self.stream, e);
                HashMap::new()
            }
        }
    }
}

fn to_stream_entry(entry: &StreamId, delivery_count: u32, delivery_count_known: bool) -> StreamEntry {
    StreamEntry {
        id: entry.id.clone(),
        body: entry.get::<String>(BODY_FIELD),
        delivery_count,
        delivery_count_known,
    }
}
