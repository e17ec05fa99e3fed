//! 活动投递的生产端：创建活动、启动投递、查询与重试

pub mod campaign_service;

pub use campaign_service::{CampaignOperations, CampaignService, StartReport};
