//! # Queue
//!
//! The contract between a consumer and the remote queue it polls. A queue exposes two operations:
//! receiving a batch of messages, and deleting (acknowledging) a batch of previously received messages.
use async_trait::async_trait;
use thiserror::Error;

/// Enumeration of errors returned by a remote queue or topic.
/// Errors are `Clone` as a single delete outcome is handed to every message that was part of the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("invalid queue configuration: {0}")]
    ConfigError(String),
    #[error("failed to resolve queue url for {queue}: {error}")]
    QueueUrlError { queue: String, error: String },
    #[error("failed to receive messages: {0}")]
    ReceiveError(String),
    #[error("failed to delete message batch: {0}")]
    DeleteError(String),
    #[error("{failed} of {total} entries in a delete batch were not deleted: {reason}")]
    PartialDeleteError {
        failed: usize,
        total: usize,
        reason: String,
    },
}

/// A message as returned by a receive call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Identifier assigned to the message by the queue.
    pub message_id: String,
    /// Token proving we are entitled to delete this particular receipt of the message.
    pub receipt_handle: String,
    /// Raw message body, possibly base64 encoded.
    pub body: String,
}

/// One entry of a delete batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    pub id: String,
    pub receipt_handle: String,
}

impl From<&ReceivedMessage> for DeleteEntry {
    fn from(message: &ReceivedMessage) -> Self {
        Self {
            id: message.message_id.to_owned(),
            receipt_handle: message.receipt_handle.to_owned(),
        }
    }
}

/// A remote queue bound to a single queue identity.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Name of the queue, used for logs and metric labels.
    fn name(&self) -> &str;

    /// Receive up to `max_messages`, waiting at most `wait_time_seconds` for any to become available.
    /// Messages are returned in the order the queue handed them out.
    async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Delete every entry in `entries`. Partial failures are reported as an error for the whole batch.
    async fn delete_batch(&self, entries: Vec<DeleteEntry>) -> Result<(), QueueError>;
}
