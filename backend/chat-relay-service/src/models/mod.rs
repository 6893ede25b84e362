pub mod message;

pub use message::{CreateMessageRequest, Message, MessageId, PendingMessage, QueuedResponse};
