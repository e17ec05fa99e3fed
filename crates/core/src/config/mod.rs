pub mod app_config;
pub mod models;

pub use app_config::{AppConfig, ENV_PREFIX};
pub use models::{
    DatabaseConfig, DeliveryConfig, ObservabilityConfig, QueueConfig, WorkerConfig,
};
