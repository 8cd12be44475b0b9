use pubsub_common::queue::QueueError;
use thiserror::Error;

/// Enumeration of errors related to configuring, running, and acknowledging messages of a Consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    #[error("sqs queue name is required")]
    MissingQueueName,
    #[error("invalid consumer configuration: {0}")]
    InvalidConfig(String),
    #[error("sqs consumer is already started")]
    AlreadyStarted,
    #[error("sqs consumer is already stopped")]
    AlreadyStopped,
    #[error("message could not be deleted: {0}")]
    DeleteError(QueueError),
    #[error("the delete coordinator is no longer running")]
    DeleterClosed,
    #[error("an error occurred in the underlying queue")]
    QueueError(#[from] QueueError),
}
