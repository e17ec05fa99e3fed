pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::{SqliteCampaignRepository, SqliteDatabase, SqliteEmailJobRepository};
