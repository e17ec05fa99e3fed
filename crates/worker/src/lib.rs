pub mod consumer;
pub mod delivery;
pub mod template;

pub use consumer::{
    BatchSummary, ConsumerHandle, ConsumerLoop, ConsumerLoopBuilder, MessageOutcome,
    ProcessedMessage,
};
pub use delivery::DeliveryClient;
pub use template::render;
