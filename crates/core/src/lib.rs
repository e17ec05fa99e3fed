pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use models::{
    AckToken, Campaign, CampaignStats, CampaignStatus, DeadLetterMessage, EmailJob,
    EmailJobMessage, JobStatus, JobStatusUpdate, NewCampaign, ReceivedMessage, Recipient,
};
pub use traits::{
    CampaignRepository, EmailJobRepository, EmailProvider, OutboundEmail, QueueClient,
};
