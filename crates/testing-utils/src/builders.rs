//! Test data builders

use mailer_core::{
    Campaign, CampaignRepository, EmailJob, MailerResult, NewCampaign, Recipient,
};

/// Builder for campaign input with sensible defaults
pub struct CampaignBuilder {
    input: NewCampaign,
}

impl CampaignBuilder {
    pub fn new() -> Self {
        Self {
            input: NewCampaign {
                name: "test_campaign".to_string(),
                subject: "Hello {{name}}".to_string(),
                body: "Hi {{name}}".to_string(),
                recipients: vec![],
                metadata: None,
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.input.name = name.to_string();
        self
    }

    pub fn with_subject(mut self, subject: &str) -> Self {
        self.input.subject = subject.to_string();
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.input.body = body.to_string();
        self
    }

    /// Recipient whose `name` field is set to `name`
    pub fn with_recipient(mut self, email: &str, name: &str) -> Self {
        self.input
            .recipients
            .push(Recipient::new(email).with_data("name", name));
        self
    }

    pub fn with_plain_recipient(mut self, email: &str) -> Self {
        self.input.recipients.push(Recipient::new(email));
        self
    }

    pub fn build(self) -> NewCampaign {
        self.input
    }

    /// Persist a draft campaign with one pending job per recipient
    pub async fn seed(
        self,
        store: &dyn CampaignRepository,
    ) -> MailerResult<(Campaign, Vec<EmailJob>)> {
        let campaign = Campaign::draft(&self.input);
        let jobs: Vec<EmailJob> = self
            .input
            .recipients
            .iter()
            .map(|recipient| EmailJob::pending(&campaign.id, recipient))
            .collect();
        store.create_with_jobs(&campaign, &jobs).await?;
        Ok((campaign, jobs))
    }
}

impl Default for CampaignBuilder {
    fn default() -> Self {
        Self::new()
    }
}
