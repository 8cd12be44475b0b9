use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::queue::{DeleteEntry, QueueClient, QueueError, ReceivedMessage};

/// An in-memory `QueueClient` for tests.
///
/// Receive calls pop scripted responses in order, and return no messages once the script is exhausted.
/// Every delete batch is recorded and succeeds unless a failure was scheduled with `fail_next_delete`.
#[derive(Default)]
pub struct MemoryQueue {
    name: String,
    state: Mutex<MemoryQueueState>,
}

#[derive(Default)]
struct MemoryQueueState {
    responses: VecDeque<Result<Vec<ReceivedMessage>, QueueError>>,
    receive_times: Vec<Instant>,
    delete_batches: Vec<Vec<DeleteEntry>>,
    delete_failures: VecDeque<QueueError>,
}

impl MemoryQueue {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            state: Default::default(),
        }
    }

    /// Queue up a receive response returning `messages`.
    pub fn push_messages(&self, messages: Vec<ReceivedMessage>) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push_back(Ok(messages));
    }

    /// Queue up a receive response failing with `error`.
    pub fn push_error(&self, error: QueueError) {
        self.state.lock().unwrap().responses.push_back(Err(error));
    }

    /// Fail the next delete batch with `error`.
    pub fn fail_next_delete(&self, error: QueueError) {
        self.state.lock().unwrap().delete_failures.push_back(error);
    }

    pub fn receive_times(&self) -> Vec<Instant> {
        self.state.lock().unwrap().receive_times.clone()
    }

    pub fn delete_batches(&self) -> Vec<Vec<DeleteEntry>> {
        self.state.lock().unwrap().delete_batches.clone()
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(
        &self,
        max_messages: i32,
        _wait_time_seconds: i32,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut state = self.state.lock().unwrap();
        state.receive_times.push(Instant::now());

        match state.responses.pop_front() {
            Some(Ok(mut messages)) => {
                let max_messages = usize::try_from(max_messages).unwrap_or_default();
                if messages.len() > max_messages {
                    let rest = messages.split_off(max_messages);
                    state.responses.push_front(Ok(rest));
                }
                Ok(messages)
            }
            Some(Err(error)) => Err(error),
            None => Ok(Vec::new()),
        }
    }

    async fn delete_batch(&self, entries: Vec<DeleteEntry>) -> Result<(), QueueError> {
        let mut state = self.state.lock().unwrap();
        state.delete_batches.push(entries);

        match state.delete_failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Build a message as SQS would return it.
pub fn message(id: &str, body: &str) -> ReceivedMessage {
    ReceivedMessage {
        message_id: id.to_owned(),
        receipt_handle: format!("receipt-{}", id),
        body: body.to_owned(),
    }
}
