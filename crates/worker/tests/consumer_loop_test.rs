use std::sync::Arc;
use std::time::{Duration, Instant};

use mailer_core::{
    Campaign, CampaignRepository, CampaignStatus, EmailJob, EmailJobMessage, EmailJobRepository,
    JobStatus, QueueClient,
};
use mailer_infrastructure::{InMemoryQueue, InMemoryQueueConfig, InMemoryStore};
use mailer_testing_utils::{CampaignBuilder, FaultyQueue, FaultyStore, ScriptedProvider, TestEnv};
use mailer_worker::{ConsumerLoop, ConsumerLoopBuilder, DeliveryClient, MessageOutcome};

struct Harness {
    store: FaultyStore,
    queue: FaultyQueue,
    provider: ScriptedProvider,
}

impl Harness {
    fn new() -> Self {
        Self::with_provider(ScriptedProvider::new())
    }

    fn with_provider(provider: ScriptedProvider) -> Self {
        let queue = InMemoryQueue::new(InMemoryQueueConfig {
            batch_size: 10,
            wait_time: Duration::from_millis(50),
            visibility_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        })
        .unwrap();
        Self {
            store: FaultyStore::new(InMemoryStore::new()),
            queue: FaultyQueue::new(queue),
            provider,
        }
    }

    fn builder(&self) -> ConsumerLoopBuilder {
        ConsumerLoop::builder(
            Arc::new(self.queue.clone()),
            Arc::new(self.store.clone()),
            Arc::new(self.store.clone()),
            DeliveryClient::new(Arc::new(self.provider.clone())),
        )
    }

    fn consumer(&self) -> ConsumerLoop {
        self.builder().build()
    }

    /// Seed a two-recipient campaign and enqueue one message per job
    async fn seed_and_enqueue(&self) -> (Campaign, Vec<EmailJob>) {
        let (campaign, jobs) = CampaignBuilder::new()
            .with_subject("Hello {{name}}")
            .with_body("Hi {{name}}")
            .with_recipient("a@x.com", "A")
            .with_recipient("b@x.com", "B")
            .seed(&self.store)
            .await
            .unwrap();
        for job in &jobs {
            self.queue
                .enqueue(&EmailJobMessage::for_job(&campaign, job))
                .await
                .unwrap();
        }
        (campaign, jobs)
    }

    async fn job(&self, id: &str) -> EmailJob {
        self.store.get_job(id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_two_recipients_are_rendered_and_sent() {
    let harness = Harness::new();
    let (campaign, jobs) = harness.seed_and_enqueue().await;

    let summary = harness.consumer().poll_once().await.unwrap().unwrap();
    assert_eq!(summary.received, 2);
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 0);

    let mut bodies: Vec<String> = harness.provider.sent().into_iter().map(|e| e.html).collect();
    bodies.sort();
    assert_eq!(bodies, vec!["Hi A", "Hi B"]);
    let mut subjects: Vec<String> = harness
        .provider
        .sent()
        .into_iter()
        .map(|e| e.subject)
        .collect();
    subjects.sort();
    assert_eq!(subjects, vec!["Hello A", "Hello B"]);

    for job in &jobs {
        let stored = harness.job(&job.id).await;
        assert_eq!(stored.status, JobStatus::Sent);
        assert!(stored.sent_at.is_some());
    }

    assert!(harness.queue.inner().dead_letters().await.unwrap().is_empty());
    assert_eq!(harness.queue.inner().stats().await.total_messages, 0);
    assert_eq!(harness.queue.acked().len(), 2);

    let stored = harness.store.get_campaign(&campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn test_delivery_failure_dead_letters_and_acknowledges() {
    let harness = Harness::new();
    harness.provider.fail_for("b@x.com", "mailbox unavailable");
    let (_, jobs) = harness.seed_and_enqueue().await;

    let summary = harness.consumer().poll_once().await.unwrap().unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);

    let failed = harness.job(&jobs[1].id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("mailbox unavailable"));
    assert_eq!(failed.retry_count, 0);
    assert!(failed.sent_at.is_none());

    let dead = harness.queue.inner().dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id(), Some(jobs[1].id.as_str()));
    assert!(dead[0].error.contains("mailbox unavailable"));
    assert_eq!(dead[0].payload["recipientEmail"], "b@x.com");

    assert_eq!(harness.queue.acked().len(), 2);
    assert_eq!(harness.queue.inner().stats().await.total_messages, 0);
}

#[tokio::test]
async fn test_poison_messages_skip_delivery() {
    let harness = Harness::new();
    let (_, jobs) = CampaignBuilder::new()
        .with_recipient("a@x.com", "A")
        .seed(&harness.store)
        .await
        .unwrap();

    harness.queue.inner().enqueue_raw("not json").await;
    harness
        .queue
        .inner()
        .enqueue_raw(format!(r#"{{"jobId":"{}"}}"#, jobs[0].id))
        .await;

    let summary = harness.consumer().poll_once().await.unwrap().unwrap();
    assert_eq!(summary.failed, 2);
    assert!(summary.campaigns.is_empty());
    assert_eq!(harness.provider.attempts(), 0);

    let dead = harness.queue.inner().dead_letters().await.unwrap();
    assert_eq!(dead.len(), 2);
    assert!(dead.iter().any(|d| d.payload.get("rawBody").is_some()));

    // 能识别出任务ID的无效消息也会把任务标记为失败
    assert_eq!(harness.job(&jobs[0].id).await.status, JobStatus::Failed);
    assert_eq!(harness.queue.inner().stats().await.total_messages, 0);
}

#[tokio::test]
async fn test_failed_sent_write_takes_failure_path() {
    let harness = Harness::new();
    harness.store.fail_job_updates_to(JobStatus::Sent);
    let (_, jobs) = harness.seed_and_enqueue().await;

    let consumer = harness.consumer();
    let batch = harness.queue.receive_batch().await.unwrap();
    let processed = consumer.process_message(&batch[0]).await;

    assert!(matches!(processed.outcome, MessageOutcome::Failed { dead_lettered: true, .. }));
    assert!(processed.acknowledged);
    let job = harness.job(processed.job_id.as_deref().unwrap()).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert!(jobs.iter().any(|j| j.id == job.id));
    assert_eq!(harness.queue.inner().dead_letters().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_ack_failure_after_send_leaves_message_for_redelivery() {
    let harness = Harness::new();
    harness.queue.set_fail_ack(true);
    let (_, jobs) = harness.seed_and_enqueue().await;

    let consumer = harness.consumer();
    let summary = consumer.poll_once().await.unwrap().unwrap();
    assert_eq!(summary.sent, 2);
    assert_eq!(harness.job(&jobs[0].id).await.status, JobStatus::Sent);

    // 确认失败的消息在可见性超时后重新出现
    harness.queue.set_fail_ack(false);
    tokio::time::sleep(Duration::from_millis(250)).await;
    let redelivered = harness.queue.receive_batch().await.unwrap();
    assert_eq!(redelivered.len(), 2);
    assert!(redelivered.iter().all(|m| m.receive_count == 2));
}

#[tokio::test]
async fn test_dead_letter_failure_still_acknowledges() {
    let harness = Harness::new();
    harness.provider.fail_all("provider down");
    harness.queue.set_fail_dead_letter(true);
    harness.seed_and_enqueue().await;

    let consumer = harness.consumer();
    let batch = harness.queue.receive_batch().await.unwrap();
    let processed = consumer.process_message(&batch[0]).await;

    match processed.outcome {
        MessageOutcome::Failed {
            dead_lettered,
            reason,
        } => {
            assert!(!dead_lettered);
            assert!(reason.contains("provider down"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(processed.acknowledged);
}

#[tokio::test]
async fn test_campaign_completion_failure_does_not_affect_jobs() {
    let harness = Harness::new();
    harness.store.set_fail_campaign_updates(true);
    let (campaign, jobs) = harness.seed_and_enqueue().await;

    let summary = harness.consumer().poll_once().await.unwrap().unwrap();
    assert_eq!(summary.sent, 2);
    assert!(summary.campaigns.contains(&campaign.id));

    for job in &jobs {
        assert_eq!(harness.job(&job.id).await.status, JobStatus::Sent);
    }
    let stored = harness.store.get_campaign(&campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Draft);
}

#[tokio::test]
async fn test_worker_panic_takes_failure_path() {
    let harness = Harness::new();
    harness.provider.panic_for("b@x.com");
    let (_, jobs) = harness.seed_and_enqueue().await;

    let summary = harness.consumer().poll_once().await.unwrap().unwrap();
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.panicked, 1);

    assert_eq!(harness.job(&jobs[0].id).await.status, JobStatus::Sent);
    let failed = harness.job(&jobs[1].id).await;
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("scripted provider panic"));

    let dead = harness.queue.inner().dead_letters().await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id(), Some(jobs[1].id.as_str()));
    assert_eq!(harness.queue.acked().len(), 2);
    assert_eq!(harness.queue.inner().stats().await.total_messages, 0);

    // 不会在可见性超时后重新投递
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(harness.queue.receive_batch().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let harness = Harness::with_provider(ScriptedProvider::new().with_delay(Duration::from_millis(50)));
    let (campaign, _) = CampaignBuilder::new()
        .with_plain_recipient("a@x.com")
        .with_plain_recipient("b@x.com")
        .with_plain_recipient("c@x.com")
        .with_plain_recipient("d@x.com")
        .seed(&harness.store)
        .await
        .unwrap();
    for job in harness.store.list_jobs(&campaign.id).await.unwrap() {
        harness
            .queue
            .enqueue(&EmailJobMessage::for_job(&campaign, &job))
            .await
            .unwrap();
    }

    let consumer = harness.builder().max_concurrency(2).build();
    let started = Instant::now();
    let summary = consumer.poll_once().await.unwrap().unwrap();

    assert_eq!(summary.sent, 4);
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_loop_recovers_from_receive_errors() {
    let harness = Harness::new();
    harness.queue.fail_next_receives(2);
    let (_, jobs) = harness.seed_and_enqueue().await;

    let handle = harness
        .builder()
        .idle_backoff(Duration::from_millis(10))
        .error_backoff(Duration::from_millis(10))
        .build()
        .start();

    let store = harness.store.clone();
    let ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
    let done = TestEnv::wait_for(
        || {
            let store = store.clone();
            let ids = ids.clone();
            async move {
                for id in &ids {
                    match store.get_job(id).await {
                        Ok(Some(job)) if job.status == JobStatus::Sent => {}
                        _ => return false,
                    }
                }
                true
            }
        },
        Duration::from_secs(3),
    )
    .await;

    handle.shutdown().await.unwrap();
    assert!(done);
    assert!(harness.queue.receive_calls() >= 3);
}

#[tokio::test]
async fn test_stop_interrupts_idle_sleep() {
    let harness = Harness::new();
    let handle = harness
        .builder()
        .idle_backoff(Duration::from_secs(60))
        .build()
        .start();

    let queue = harness.queue.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let queue = queue.clone();
                async move { queue.receive_calls() >= 1 }
            },
            Duration::from_secs(2)
        )
        .await
    );
    // 让第一次拉取返回空批次进入空闲休眠
    tokio::time::sleep(Duration::from_millis(100)).await;

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown should not wait for the idle backoff")
        .unwrap();
    assert_eq!(harness.queue.receive_calls(), 1);
}

#[tokio::test]
async fn test_stop_before_first_poll() {
    let harness = Harness::new();
    let handle = harness.consumer().start();
    handle.stop();
    handle.join().await.unwrap();
    assert!(harness.queue.receive_calls() <= 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_batch() {
    let harness =
        Harness::with_provider(ScriptedProvider::new().with_delay(Duration::from_millis(200)));
    let (campaign, jobs) = harness.seed_and_enqueue().await;

    let handle = harness.consumer().start();
    let provider = harness.provider.clone();
    assert!(
        TestEnv::wait_for(
            || {
                let provider = provider.clone();
                async move { provider.attempts() >= 1 }
            },
            Duration::from_secs(2)
        )
        .await
    );

    handle.shutdown().await.unwrap();

    for job in &jobs {
        assert_eq!(harness.job(&job.id).await.status, JobStatus::Sent);
    }
    assert_eq!(harness.provider.sent().len(), 2);
    assert_eq!(harness.queue.acked().len(), 2);
    assert_eq!(harness.queue.inner().stats().await.total_messages, 0);
    let stored = harness.store.get_campaign(&campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
}
