//! Test doubles for the provider, queue and store traits
//!
//! The queue and store doubles wrap the in-memory adapters and inject failures
//! on demand, so tests exercise real queue and store semantics everywhere else.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use mailer_core::{
    AckToken, Campaign, CampaignRepository, CampaignStats, CampaignStatus, EmailJob,
    EmailJobMessage, EmailJobRepository, EmailProvider, JobStatus, JobStatusUpdate, MailerError,
    MailerResult, OutboundEmail, QueueClient, ReceivedMessage,
};
use mailer_infrastructure::{InMemoryQueue, InMemoryStore};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted email provider that records every accepted email
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    from: String,
    sent: Arc<Mutex<Vec<OutboundEmail>>>,
    failures: Arc<Mutex<HashMap<String, String>>>,
    panics: Arc<Mutex<HashSet<String>>>,
    fail_all: Arc<Mutex<Option<String>>>,
    attempts: Arc<AtomicUsize>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            from: "noreply@test.local".to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            panics: Arc::new(Mutex::new(HashSet::new())),
            fail_all: Arc::new(Mutex::new(None)),
            attempts: Arc::new(AtomicUsize::new(0)),
            delay: Arc::new(Mutex::new(None)),
        }
    }

    /// Reject every email sent to `recipient`
    pub fn fail_for(&self, recipient: &str, reason: &str) {
        lock(&self.failures).insert(recipient.to_string(), reason.to_string());
    }

    /// Panic while sending to `recipient`
    pub fn panic_for(&self, recipient: &str) {
        lock(&self.panics).insert(recipient.to_string());
    }

    pub fn fail_all(&self, reason: &str) {
        *lock(&self.fail_all) = Some(reason.to_string());
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *lock(&self.delay) = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmailProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn from_address(&self) -> &str {
        &self.from
    }

    async fn send(&self, email: &OutboundEmail) -> MailerResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.panics).contains(&email.to) {
            panic!("scripted provider panic for {}", email.to);
        }
        if let Some(reason) = lock(&self.fail_all).clone() {
            return Err(MailerError::Delivery(reason));
        }
        if let Some(reason) = lock(&self.failures).get(&email.to).cloned() {
            return Err(MailerError::Delivery(reason));
        }

        lock(&self.sent).push(email.clone());
        Ok(())
    }
}

/// In-memory queue wrapper with switchable failures
#[derive(Debug, Clone)]
pub struct FaultyQueue {
    inner: InMemoryQueue,
    enqueue_budget: Arc<Mutex<Option<usize>>>,
    receive_failures: Arc<AtomicUsize>,
    receive_calls: Arc<AtomicUsize>,
    fail_ack: Arc<AtomicBool>,
    fail_dead_letter: Arc<AtomicBool>,
    acked: Arc<Mutex<Vec<AckToken>>>,
}

impl FaultyQueue {
    pub fn new(inner: InMemoryQueue) -> Self {
        Self {
            inner,
            enqueue_budget: Arc::new(Mutex::new(None)),
            receive_failures: Arc::new(AtomicUsize::new(0)),
            receive_calls: Arc::new(AtomicUsize::new(0)),
            fail_ack: Arc::new(AtomicBool::new(false)),
            fail_dead_letter: Arc::new(AtomicBool::new(false)),
            acked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn inner(&self) -> &InMemoryQueue {
        &self.inner
    }

    /// Allow `count` more enqueues, then fail every following one
    pub fn fail_enqueue_after(&self, count: usize) {
        *lock(&self.enqueue_budget) = Some(count);
    }

    /// Fail the next `count` receive calls
    pub fn fail_next_receives(&self, count: usize) {
        self.receive_failures.store(count, Ordering::SeqCst);
    }

    pub fn set_fail_ack(&self, fail: bool) {
        self.fail_ack.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_dead_letter(&self, fail: bool) {
        self.fail_dead_letter.store(fail, Ordering::SeqCst);
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> Vec<AckToken> {
        lock(&self.acked).clone()
    }
}

#[async_trait]
impl QueueClient for FaultyQueue {
    async fn enqueue(&self, message: &EmailJobMessage) -> MailerResult<()> {
        {
            let mut budget = lock(&self.enqueue_budget);
            match budget.as_mut() {
                Some(0) => {
                    return Err(MailerError::QueueUnavailable(
                        "injected enqueue failure".to_string(),
                    ))
                }
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        self.inner.enqueue(message).await
    }

    async fn receive_batch(&self) -> MailerResult<Vec<ReceivedMessage>> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .receive_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MailerError::QueueUnavailable(
                "injected receive failure".to_string(),
            ));
        }
        self.inner.receive_batch().await
    }

    async fn acknowledge(&self, ack_token: &AckToken) -> MailerResult<()> {
        if self.fail_ack.load(Ordering::SeqCst) {
            return Err(MailerError::QueueUnavailable(
                "injected ack failure".to_string(),
            ));
        }
        self.inner.acknowledge(ack_token).await?;
        lock(&self.acked).push(ack_token.clone());
        Ok(())
    }

    async fn dead_letter(&self, body: &str, reason: &str) -> MailerResult<()> {
        if self.fail_dead_letter.load(Ordering::SeqCst) {
            return Err(MailerError::QueueUnavailable(
                "injected dead-letter failure".to_string(),
            ));
        }
        self.inner.dead_letter(body, reason).await
    }
}

/// In-memory store wrapper that can fail status writes
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    failing_statuses: Arc<Mutex<HashSet<JobStatus>>>,
    fail_campaign_updates: Arc<AtomicBool>,
}

impl FaultyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            failing_statuses: Arc::new(Mutex::new(HashSet::new())),
            fail_campaign_updates: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Fail every job update that targets `status`
    pub fn fail_job_updates_to(&self, status: JobStatus) {
        lock(&self.failing_statuses).insert(status);
    }

    pub fn set_fail_campaign_updates(&self, fail: bool) {
        self.fail_campaign_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CampaignRepository for FaultyStore {
    async fn create_with_jobs(&self, campaign: &Campaign, jobs: &[EmailJob]) -> MailerResult<()> {
        self.inner.create_with_jobs(campaign, jobs).await
    }

    async fn get_campaign(&self, id: &str) -> MailerResult<Option<Campaign>> {
        self.inner.get_campaign(id).await
    }

    async fn list_campaigns(&self) -> MailerResult<Vec<Campaign>> {
        self.inner.list_campaigns().await
    }

    async fn update_campaign_status(&self, id: &str, status: CampaignStatus) -> MailerResult<()> {
        if self.fail_campaign_updates.load(Ordering::SeqCst) {
            return Err(MailerError::Store("injected campaign update failure".to_string()));
        }
        self.inner.update_campaign_status(id, status).await
    }

    async fn transition_campaign_status(
        &self,
        id: &str,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> MailerResult<bool> {
        if self.fail_campaign_updates.load(Ordering::SeqCst) {
            return Err(MailerError::Store("injected campaign update failure".to_string()));
        }
        self.inner.transition_campaign_status(id, from, to).await
    }
}

#[async_trait]
impl EmailJobRepository for FaultyStore {
    async fn get_job(&self, id: &str) -> MailerResult<Option<EmailJob>> {
        self.inner.get_job(id).await
    }

    async fn list_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>> {
        self.inner.list_jobs(campaign_id).await
    }

    async fn list_pending_jobs(&self, campaign_id: &str) -> MailerResult<Vec<EmailJob>> {
        self.inner.list_pending_jobs(campaign_id).await
    }

    async fn update_job_status(&self, id: &str, update: &JobStatusUpdate) -> MailerResult<()> {
        if lock(&self.failing_statuses).contains(&update.status) {
            return Err(MailerError::Store(format!(
                "injected failure writing status {}",
                update.status
            )));
        }
        self.inner.update_job_status(id, update).await
    }

    async fn mark_job_queued_if_pending(&self, id: &str) -> MailerResult<bool> {
        if lock(&self.failing_statuses).contains(&JobStatus::Queued) {
            return Err(MailerError::Store(
                "injected failure writing status queued".to_string(),
            ));
        }
        self.inner.mark_job_queued_if_pending(id).await
    }

    async fn count_jobs_by_status(&self, campaign_id: &str) -> MailerResult<CampaignStats> {
        self.inner.count_jobs_by_status(campaign_id).await
    }

    async fn reset_failed_jobs(&self, campaign_id: &str) -> MailerResult<u64> {
        self.inner.reset_failed_jobs(campaign_id).await
    }
}
