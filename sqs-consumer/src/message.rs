use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pubsub_common::queue::{DeleteEntry, ReceivedMessage};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::deleter::DeleteRequest;
use crate::error::ConsumerError;
use crate::state::ConsumerState;

/// A message received by a `Consumer`.
///
/// Every message counts as in flight until its delete batch was sent. Dropping a message
/// without calling `done` releases it without deleting it, so the queue will redeliver it once
/// its visibility timeout expires.
pub struct SqsMessage {
    message: ReceivedMessage,
    consume_base64: bool,
    deleter: mpsc::Sender<DeleteRequest>,
    state: Arc<ConsumerState>,
    /// The delete request reached the coordinator, which now owns the in-flight slot.
    submitted: bool,
    completed: bool,
}

impl SqsMessage {
    pub(crate) fn new(
        message: ReceivedMessage,
        consume_base64: bool,
        deleter: mpsc::Sender<DeleteRequest>,
        state: Arc<ConsumerState>,
    ) -> Self {
        Self {
            message,
            consume_base64,
            deleter,
            state,
            submitted: false,
            completed: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }

    pub fn receipt_handle(&self) -> &str {
        &self.message.receipt_handle
    }

    /// The message body as received, without base64 decoding.
    pub fn raw_body(&self) -> &str {
        &self.message.body
    }

    /// The message body, base64 decoded if the consumer is configured to do so.
    /// A body that fails to decode is logged and returned empty.
    pub fn body(&self) -> Vec<u8> {
        if !self.consume_base64 {
            return self.message.body.as_bytes().to_vec();
        }

        match STANDARD.decode(&self.message.body) {
            Ok(body) => body,
            Err(error) => {
                warn!(
                    "unable to decode body of message {}: {}",
                    self.message.message_id, error
                );
                Vec::new()
            }
        }
    }

    /// Acknowledge this message, deleting it from the queue.
    ///
    /// Waits until a delete batch including this message was sent, which with a delete buffer
    /// size of 0 is immediately. A failed delete is returned, but the message will still be
    /// redelivered by the queue later.
    ///
    /// Once the request was handed to the coordinator, cancelling this future does not withdraw
    /// it: the entry is still deleted with its batch.
    pub async fn done(mut self) -> Result<(), ConsumerError> {
        let (receipt, outcome) = oneshot::channel();
        let request = DeleteRequest {
            entry: DeleteEntry::from(&self.message),
            receipt,
        };

        if self.deleter.send(request).await.is_err() {
            self.completed = true;
            return Err(ConsumerError::DeleterClosed);
        }
        self.submitted = true;
        self.completed = true;

        match outcome.await {
            Ok(result) => result.map_err(ConsumerError::DeleteError),
            Err(_) => Err(ConsumerError::DeleterClosed),
        }
    }
}

impl Drop for SqsMessage {
    fn drop(&mut self) {
        if !self.completed {
            warn!(
                "message {} dropped without being acknowledged",
                self.message.message_id
            );
        }
        // Submitted entries are released by the coordinator when their batch is sent.
        if !self.submitted {
            self.state.decrement_in_flight();
        }
    }
}

impl fmt::Debug for SqsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqsMessage")
            .field("message_id", &self.message.message_id)
            .field("receipt_handle", &self.message.receipt_handle)
            .field("submitted", &self.submitted)
            .field("completed", &self.completed)
            .finish()
    }
}
