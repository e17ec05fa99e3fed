pub mod email_provider;
pub mod message_queue;
pub mod repository;

pub use email_provider::*;
pub use message_queue::*;
pub use repository::*;
