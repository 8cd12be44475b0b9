use std::mem;
use std::sync::Arc;

use pubsub_common::queue::{DeleteEntry, QueueClient, QueueError};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::state::ConsumerState;

/// A request to delete one message, answered with the outcome of the batch that carried it.
pub(crate) struct DeleteRequest {
    pub(crate) entry: DeleteEntry,
    pub(crate) receipt: oneshot::Sender<Result<(), QueueError>>,
}

/// Entries waiting for a delete batch, along with who to notify once it is sent.
#[derive(Default)]
struct PendingDeletes {
    entries: Vec<DeleteEntry>,
    receipts: Vec<oneshot::Sender<Result<(), QueueError>>>,
}

impl PendingDeletes {
    fn push(&mut self, request: DeleteRequest) {
        self.entries.push(request.entry);
        self.receipts.push(request.receipt);
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Collects delete requests from message handles and sends them to the queue in batches.
pub(crate) struct DeleteCoordinator<Q: QueueClient + ?Sized> {
    queue: Arc<Q>,
    /// A batch is sent once more than this many entries are pending.
    buffer_size: usize,
    state: Arc<ConsumerState>,
    requests: mpsc::Receiver<DeleteRequest>,
}

impl<Q: QueueClient + ?Sized> DeleteCoordinator<Q> {
    pub(crate) fn new(
        queue: Arc<Q>,
        buffer_size: usize,
        state: Arc<ConsumerState>,
        requests: mpsc::Receiver<DeleteRequest>,
    ) -> Self {
        Self {
            queue,
            buffer_size,
            state,
            requests,
        }
    }

    /// Run until the poll loop has exited and every message it emitted has been acknowledged or released,
    /// or until no handle is left that could send us a request.
    pub(crate) async fn run(mut self) {
        let mut pending = PendingDeletes::default();

        loop {
            tokio::select! {
                biased;

                request = self.requests.recv() => {
                    let Some(request) = request else {
                        debug!("delete request channel closed");
                        break;
                    };
                    pending.push(request);

                    // Nothing else can arrive: flush right away instead of waiting for the threshold.
                    if self.is_drained(&pending) {
                        break;
                    }

                    if pending.len() > self.buffer_size {
                        self.flush(&mut pending).await;
                    }
                }
                _ = self.state.deleter_wakeup() => {
                    if self.is_drained(&pending) {
                        break;
                    }
                }
            }
        }

        if !pending.is_empty() {
            self.flush(&mut pending).await;
        }

        info!("delete coordinator for {} stopped", self.state.queue());
    }

    /// Every message still in flight is waiting in `pending`, and the poll loop won't emit more.
    /// Pending entries stay counted in flight until `flush` answers them, even if their caller
    /// stopped waiting.
    fn is_drained(&self, pending: &PendingDeletes) -> bool {
        self.state.is_polling_done() && self.state.in_flight() == pending.len() as u64
    }

    /// Send one delete batch with every pending entry, and hand its outcome to each of them.
    async fn flush(&self, pending: &mut PendingDeletes) {
        let PendingDeletes { entries, receipts } = mem::take(pending);
        let batch_size = entries.len();
        let labels = [("queue", self.state.queue().to_owned())];

        let now = tokio::time::Instant::now();
        let result = self.queue.delete_batch(entries).await;
        let elapsed = now.elapsed().as_secs_f64();

        metrics::histogram!("sqs_delete_batch_size", &labels).record(batch_size as f64);
        metrics::histogram!("sqs_delete_batch_duration_seconds", &labels).record(elapsed);

        match &result {
            Ok(()) => {
                debug!("deleted {} messages", batch_size);
                metrics::counter!("sqs_messages_deleted_total", &labels)
                    .increment(batch_size as u64);
            }
            Err(error) => {
                warn!("failed to delete batch of {} messages: {}", batch_size, error);
                metrics::counter!("sqs_delete_failures_total", &labels)
                    .increment(batch_size as u64);
            }
        }

        for receipt in receipts {
            self.state.decrement_in_flight();
            if receipt.send(result.clone()).is_err() {
                debug!("caller stopped waiting for its delete outcome");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pubsub_common::test_utils::{message, MemoryQueue};

    use super::*;

    struct Harness {
        queue: Arc<MemoryQueue>,
        state: Arc<ConsumerState>,
        requests: mpsc::Sender<DeleteRequest>,
        coordinator: tokio::task::JoinHandle<()>,
    }

    fn start(buffer_size: usize) -> Harness {
        let queue = Arc::new(MemoryQueue::new("test"));
        let state = Arc::new(ConsumerState::new("test"));
        let (requests, receiver) = mpsc::channel(16);
        let coordinator = tokio::spawn(
            DeleteCoordinator::new(queue.clone(), buffer_size, state.clone(), receiver).run(),
        );

        Harness {
            queue,
            state,
            requests,
            coordinator,
        }
    }

    async fn request(
        harness: &Harness,
        id: &str,
    ) -> oneshot::Receiver<Result<(), QueueError>> {
        let (receipt, outcome) = oneshot::channel();
        harness
            .requests
            .send(DeleteRequest {
                entry: DeleteEntry::from(&message(id, "")),
                receipt,
            })
            .await
            .expect("coordinator is not running");
        outcome
    }

    #[tokio::test]
    async fn test_zero_buffer_deletes_each_request() {
        let harness = start(0);

        for id in ["1", "2"] {
            harness.state.increment_in_flight();
            let outcome = request(&harness, id).await;
            assert_eq!(outcome.await.expect("no outcome"), Ok(()));
            assert_eq!(harness.state.in_flight(), 0);
        }

        let batches = harness.queue.delete_batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![DeleteEntry::from(&message("1", ""))]);
        assert_eq!(batches[1], vec![DeleteEntry::from(&message("2", ""))]);
    }

    #[tokio::test]
    async fn test_buffer_is_flushed_once_exceeded() {
        let harness = start(2);
        for _ in 0..6 {
            harness.state.increment_in_flight();
        }

        let first = request(&harness, "1").await;
        let second = request(&harness, "2").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(harness.queue.delete_batches().is_empty());

        harness
            .queue
            .fail_next_delete(QueueError::DeleteError("throttled".to_owned()));
        let third = request(&harness, "3").await;

        let failed = Err(QueueError::DeleteError("throttled".to_owned()));
        assert_eq!(first.await.expect("no outcome"), failed);
        assert_eq!(second.await.expect("no outcome"), failed);
        assert_eq!(third.await.expect("no outcome"), failed);

        let batches = harness.queue.delete_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(harness.state.in_flight(), 3);

        // A failed batch does not stop the coordinator.
        let fourth = request(&harness, "4").await;
        let fifth = request(&harness, "5").await;
        let sixth = request(&harness, "6").await;
        assert_eq!(fourth.await.expect("no outcome"), Ok(()));
        assert_eq!(fifth.await.expect("no outcome"), Ok(()));
        assert_eq!(sixth.await.expect("no outcome"), Ok(()));
        assert_eq!(harness.queue.delete_batches().len(), 2);
    }

    #[tokio::test]
    async fn test_last_in_flight_request_is_flushed_after_polling() {
        let harness = start(10);
        harness.state.increment_in_flight();
        harness.state.increment_in_flight();

        let first = request(&harness, "1").await;
        harness.state.finish_polling();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(harness.queue.delete_batches().is_empty());
        assert!(!harness.coordinator.is_finished());

        let second = request(&harness, "2").await;
        assert_eq!(first.await.expect("no outcome"), Ok(()));
        assert_eq!(second.await.expect("no outcome"), Ok(()));

        harness.coordinator.await.expect("coordinator panicked");
        let batches = harness.queue.delete_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_requests_are_flushed_with_the_rest() {
        let harness = start(10);
        for _ in 0..3 {
            harness.state.increment_in_flight();
        }

        // Two callers gave up waiting after sending their request.
        drop(request(&harness, "1").await);
        drop(request(&harness, "2").await);
        harness.state.finish_polling();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!harness.coordinator.is_finished());
        assert_eq!(harness.state.in_flight(), 3);

        let last = request(&harness, "3").await;
        assert_eq!(last.await.expect("no outcome"), Ok(()));
        harness.coordinator.await.expect("coordinator panicked");

        let batches = harness.queue.delete_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
        assert_eq!(harness.state.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_exits_once_in_flight_drops_to_zero() {
        let harness = start(0);
        harness.state.increment_in_flight();
        harness.state.finish_polling();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!harness.coordinator.is_finished());

        // The last message was released without being acknowledged.
        harness.state.decrement_in_flight();
        harness.coordinator.await.expect("coordinator panicked");
        assert!(harness.queue.delete_batches().is_empty());
    }

    #[tokio::test]
    async fn test_exits_when_request_channel_closes() {
        let harness = start(5);
        harness.state.increment_in_flight();
        harness.state.increment_in_flight();

        let outcome = request(&harness, "1").await;
        let Harness {
            queue,
            requests,
            coordinator,
            ..
        } = harness;
        drop(requests);

        assert_eq!(outcome.await.expect("no outcome"), Ok(()));
        coordinator.await.expect("coordinator panicked");
        assert_eq!(queue.delete_batches().len(), 1);
    }
}
