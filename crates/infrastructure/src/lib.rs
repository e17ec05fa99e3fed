pub mod database;
pub mod in_memory_queue;
pub mod redis_stream;
pub mod sendgrid;

pub use database::{InMemoryStore, SqliteCampaignRepository, SqliteDatabase, SqliteEmailJobRepository};
pub use in_memory_queue::{InMemoryQueue, InMemoryQueueConfig, QueueStats};
pub use redis_stream::RedisStreamQueue;
pub use sendgrid::SendGridProvider;
