pub mod campaign;
pub mod email_job;
pub mod message;

pub use campaign::*;
pub use email_job::*;
pub use message::*;
