//! # SqsQueue
//!
//! A `QueueClient` backed by Amazon SQS.
use async_trait::async_trait;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::DeleteMessageBatchRequestEntry;
use aws_sdk_sqs::Client;
use tracing::{info, warn};

use crate::aws::{load_sdk_config, AwsConfig};
use crate::queue::{DeleteEntry, QueueClient, QueueError, ReceivedMessage};

/// SQS rejects delete batches with more entries than this.
pub const MAX_DELETE_BATCH_ENTRIES: usize = 10;

pub struct SqsQueue {
    client: Client,
    name: String,
    queue_url: String,
}

impl SqsQueue {
    /// Initialize a new SqsQueue, resolving the queue's URL from its name.
    ///
    /// # Arguments
    ///
    /// * `queue_name`: The name of the SQS queue. Must not be empty.
    /// * `aws`: Region and credentials used to build the SQS client.
    pub async fn new(queue_name: &str, aws: &AwsConfig) -> Result<Self, QueueError> {
        if queue_name.is_empty() {
            return Err(QueueError::ConfigError(
                "sqs queue name is required".to_owned(),
            ));
        }

        let sdk_config = load_sdk_config(aws).await;
        let client = Client::new(&sdk_config);

        Self::new_from_client(queue_name, client).await
    }

    /// Initialize a new SqsQueue from an existing client.
    pub async fn new_from_client(queue_name: &str, client: Client) -> Result<Self, QueueError> {
        let output = client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await
            .map_err(|error| QueueError::QueueUrlError {
                queue: queue_name.to_owned(),
                error: DisplayErrorContext(&error).to_string(),
            })?;

        let queue_url = output
            .queue_url()
            .ok_or_else(|| QueueError::QueueUrlError {
                queue: queue_name.to_owned(),
                error: "no queue url returned".to_owned(),
            })?
            .to_owned();

        info!("resolved sqs queue {} to {}", queue_name, queue_url);

        Ok(Self {
            client,
            name: queue_name.to_owned(),
            queue_url,
        })
    }

    async fn delete_chunk(&self, entries: &[DeleteEntry]) -> Result<(), QueueError> {
        let entries = entries
            .iter()
            .map(|entry| {
                DeleteMessageBatchRequestEntry::builder()
                    .id(&entry.id)
                    .receipt_handle(&entry.receipt_handle)
                    .build()
                    .map_err(|error| QueueError::DeleteError(error.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let total = entries.len();

        let output = self
            .client
            .delete_message_batch()
            .queue_url(&self.queue_url)
            .set_entries(Some(entries))
            .send()
            .await
            .map_err(|error| QueueError::DeleteError(DisplayErrorContext(&error).to_string()))?;

        let failed = output.failed();
        if failed.is_empty() {
            return Ok(());
        }

        Err(QueueError::PartialDeleteError {
            failed: failed.len(),
            total,
            reason: failed
                .iter()
                .map(|entry| format!("{}: {}", entry.id(), entry.code()))
                .collect::<Vec<_>>()
                .join(", "),
        })
    }
}

#[async_trait]
impl QueueClient for SqsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_seconds)
            .send()
            .await
            .map_err(|error| QueueError::ReceiveError(DisplayErrorContext(&error).to_string()))?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|message| {
                match (message.message_id(), message.receipt_handle()) {
                    (Some(message_id), Some(receipt_handle)) => Some(ReceivedMessage {
                        message_id: message_id.to_owned(),
                        receipt_handle: receipt_handle.to_owned(),
                        body: message.body().unwrap_or_default().to_owned(),
                    }),
                    // Without both we could never acknowledge it, so let it be redelivered.
                    _ => {
                        warn!("skipping sqs message without an id or receipt handle");
                        None
                    }
                }
            })
            .collect();

        Ok(messages)
    }

    async fn delete_batch(&self, entries: Vec<DeleteEntry>) -> Result<(), QueueError> {
        let mut result = Ok(());

        for chunk in entries.chunks(MAX_DELETE_BATCH_ENTRIES) {
            if let Err(error) = self.delete_chunk(chunk).await {
                warn!("failed to delete {} messages: {}", chunk.len(), error);
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }

        result
    }
}
