use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mailer_core::{
    AckToken, CampaignRepository, CampaignStatus, EmailJobMessage, EmailJobRepository, JobStatus,
    JobStatusUpdate, MailerError, MailerResult, NewCampaign, QueueClient, ReceivedMessage,
    Recipient,
};
use mailer_dispatcher::{CampaignOperations, CampaignService};
use mailer_infrastructure::{InMemoryQueue, InMemoryQueueConfig, InMemoryStore};
use mailer_testing_utils::{CampaignBuilder, FaultyQueue, ScriptedProvider};
use mailer_worker::{ConsumerLoop, DeliveryClient};

fn memory_queue() -> InMemoryQueue {
    InMemoryQueue::new(InMemoryQueueConfig {
        batch_size: 10,
        wait_time: Duration::from_millis(20),
        visibility_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
    })
    .unwrap()
}

fn queue() -> FaultyQueue {
    FaultyQueue::new(memory_queue())
}

/// 每写入一条消息就立即运行一轮消费的队列
struct ConsumingQueue {
    inner: InMemoryQueue,
    consumer: ConsumerLoop,
}

#[async_trait]
impl QueueClient for ConsumingQueue {
    async fn enqueue(&self, message: &EmailJobMessage) -> MailerResult<()> {
        self.inner.enqueue(message).await?;
        self.consumer.poll_once().await?;
        Ok(())
    }

    async fn receive_batch(&self) -> MailerResult<Vec<ReceivedMessage>> {
        self.inner.receive_batch().await
    }

    async fn acknowledge(&self, ack_token: &AckToken) -> MailerResult<()> {
        self.inner.acknowledge(ack_token).await
    }

    async fn dead_letter(&self, body: &str, reason: &str) -> MailerResult<()> {
        self.inner.dead_letter(body, reason).await
    }
}

fn service(store: &InMemoryStore, queue: &FaultyQueue) -> CampaignService {
    CampaignService::new(Arc::new(store.clone()), Arc::new(store.clone()))
        .with_queue(Arc::new(queue.clone()))
}

fn two_recipients() -> NewCampaign {
    CampaignBuilder::new()
        .with_body("Hi {{name}}")
        .with_recipient("a@x.com", "A")
        .with_recipient("b@x.com", "B")
        .build()
}

#[tokio::test]
async fn test_create_campaign_persists_draft_and_pending_jobs() {
    let store = InMemoryStore::new();
    let service = service(&store, &queue());

    let campaign = service.create_campaign(two_recipients()).await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Draft);

    let jobs = service.list_jobs(&campaign.id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Pending && j.retry_count == 0));
    assert_eq!(jobs[0].recipient_data["name"], "A");

    let stats = service.campaign_stats(&campaign.id).await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.pending, 2);
}

#[tokio::test]
async fn test_create_campaign_rejects_invalid_input() {
    let store = InMemoryStore::new();
    let service = service(&store, &queue());

    let mut input = two_recipients();
    input.recipients.push(Recipient::new("not-an-address"));
    let err = service.create_campaign(input).await.unwrap_err();
    assert!(matches!(err, MailerError::Validation(_)));
    assert!(service.list_campaigns().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_start_campaign_enqueues_one_message_per_job() {
    let store = InMemoryStore::new();
    let queue = queue();
    let service = service(&store, &queue);
    let campaign = service.create_campaign(two_recipients()).await.unwrap();

    let report = service.start_campaign(&campaign.id).await.unwrap();
    assert_eq!(report.enqueued, 2);

    let batch = queue.inner().receive_batch().await.unwrap();
    let messages: Vec<EmailJobMessage> = batch.iter().map(|m| m.decode().unwrap()).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.campaign_id == campaign.id));
    assert!(messages.iter().all(|m| m.body == "Hi {{name}}"));
    let names: Vec<_> = messages.iter().map(|m| m.data()["name"].clone()).collect();
    assert!(names.contains(&serde_json::json!("A")));
    assert!(names.contains(&serde_json::json!("B")));

    let stored = service.get_campaign(&campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Queued);
    let stats = service.campaign_stats(&campaign.id).await.unwrap();
    assert_eq!(stats.queued, 2);
}

#[tokio::test]
async fn test_start_keeps_progress_made_by_a_running_consumer() {
    let store = InMemoryStore::new();
    let inner = memory_queue();
    let provider = ScriptedProvider::new();
    let consumer = ConsumerLoop::builder(
        Arc::new(inner.clone()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        DeliveryClient::new(Arc::new(provider.clone())),
    )
    .build();
    let service = CampaignService::new(Arc::new(store.clone()), Arc::new(store.clone()))
        .with_queue(Arc::new(ConsumingQueue {
            inner: inner.clone(),
            consumer,
        }));
    let campaign = service.create_campaign(two_recipients()).await.unwrap();

    let report = service.start_campaign(&campaign.id).await.unwrap();
    assert_eq!(report.enqueued, 2);
    assert_eq!(provider.sent().len(), 2);

    // 消费者写入的 sent 与 completed 不会被启动流程覆盖
    let stats = service.campaign_stats(&campaign.id).await.unwrap();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.queued, 0);
    let jobs = service.list_jobs(&campaign.id).await.unwrap();
    assert!(jobs.iter().all(|j| j.sent_at.is_some()));
    let stored = service.get_campaign(&campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
    assert_eq!(inner.stats().await.total_messages, 0);
}

#[tokio::test]
async fn test_start_requires_existing_draft_campaign() {
    let store = InMemoryStore::new();
    let service = service(&store, &queue());

    assert!(matches!(
        service.start_campaign("missing").await,
        Err(MailerError::CampaignNotFound { .. })
    ));

    let campaign = service.create_campaign(two_recipients()).await.unwrap();
    service.start_campaign(&campaign.id).await.unwrap();
    assert!(matches!(
        service.start_campaign(&campaign.id).await,
        Err(MailerError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_enqueue_failure_keeps_campaign_draft_and_resumes_on_restart() {
    let store = InMemoryStore::new();
    let queue = queue();
    let service = service(&store, &queue);
    let campaign = service.create_campaign(two_recipients()).await.unwrap();

    queue.fail_enqueue_after(1);
    let err = service.start_campaign(&campaign.id).await.unwrap_err();
    assert!(matches!(err, MailerError::QueueUnavailable(_)));

    let stored = service.get_campaign(&campaign.id).await.unwrap();
    assert_eq!(stored.status, CampaignStatus::Draft);
    let stats = service.campaign_stats(&campaign.id).await.unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.pending, 1);

    // 重新启动只会写入尚未入队的任务
    queue.fail_enqueue_after(usize::MAX);
    let report = service.start_campaign(&campaign.id).await.unwrap();
    assert_eq!(report.enqueued, 1);
    assert_eq!(queue.inner().stats().await.total_messages, 2);
}

#[tokio::test]
async fn test_start_without_queue_is_unavailable() {
    let store = InMemoryStore::new();
    let service = CampaignService::new(Arc::new(store.clone()), Arc::new(store.clone()));
    let campaign = service.create_campaign(two_recipients()).await.unwrap();

    assert!(matches!(
        service.start_campaign(&campaign.id).await,
        Err(MailerError::QueueUnavailable(_))
    ));
    assert_eq!(
        service.get_campaign(&campaign.id).await.unwrap().status,
        CampaignStatus::Draft
    );
}

#[tokio::test]
async fn test_retry_failed_jobs_resets_first_failures_once() {
    let store = InMemoryStore::new();
    let service = service(&store, &queue());
    let campaign = service.create_campaign(two_recipients()).await.unwrap();
    let jobs = service.list_jobs(&campaign.id).await.unwrap();

    store
        .update_job_status(&jobs[0].id, &JobStatusUpdate::failed("bounced"))
        .await
        .unwrap();
    store
        .update_job_status(&jobs[1].id, &JobStatusUpdate::sent())
        .await
        .unwrap();

    assert_eq!(service.retry_failed_jobs(&campaign.id).await.unwrap(), 1);
    assert_eq!(service.retry_failed_jobs(&campaign.id).await.unwrap(), 0);

    let retried = service.get_job(&jobs[0].id).await.unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.error.is_none());

    assert!(matches!(
        service.retry_failed_jobs("missing").await,
        Err(MailerError::CampaignNotFound { .. })
    ));
}

#[tokio::test]
async fn test_queries_report_missing_records() {
    let store = InMemoryStore::new();
    let service = service(&store, &queue());

    assert!(matches!(
        service.get_job("missing").await,
        Err(MailerError::JobNotFound { .. })
    ));
    assert!(matches!(
        service.list_jobs("missing").await,
        Err(MailerError::CampaignNotFound { .. })
    ));

    let first = service.create_campaign(two_recipients()).await.unwrap();
    let second = service
        .create_campaign(CampaignBuilder::new().with_name("second").build())
        .await
        .unwrap();
    let listed = service.list_campaigns().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().any(|c| c.id == first.id));
    assert!(store.get_campaign(&second.id).await.unwrap().is_some());
}
