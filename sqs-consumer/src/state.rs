use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;

use pubsub_common::queue::QueueError;
use tokio::sync::Notify;
use tracing::debug;

/// Lifecycle of a Consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerStatus {
    /// Polling for messages.
    Running,
    /// Stop was requested, the poll loop has not exited yet.
    Stopping,
    /// The poll loop exited and the output stream is closed.
    Stopped,
}

/// The only state shared between the poll loop, the delete coordinator, and message handles.
pub(crate) struct ConsumerState {
    queue: String,
    in_flight: AtomicU64,
    stop_requested: AtomicBool,
    polling_done: AtomicBool,
    error: OnceLock<QueueError>,
    /// Wakes the delete coordinator so it can re-evaluate whether it is drained.
    deleter_wakeup: Notify,
}

impl ConsumerState {
    pub(crate) fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_owned(),
            in_flight: AtomicU64::new(0),
            stop_requested: AtomicBool::new(false),
            polling_done: AtomicBool::new(false),
            error: OnceLock::new(),
            deleter_wakeup: Notify::new(),
        }
    }

    pub(crate) fn queue(&self) -> &str {
        &self.queue
    }

    pub(crate) fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_in_flight(&self) {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.report_in_flight(in_flight);
    }

    pub(crate) fn decrement_in_flight(&self) {
        let previous = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        self.report_in_flight(previous.saturating_sub(1));
        self.deleter_wakeup.notify_one();
    }

    fn report_in_flight(&self, in_flight: u64) {
        let labels = [("queue", self.queue.clone())];
        metrics::gauge!("sqs_messages_in_flight", &labels).set(in_flight as f64);
    }

    /// Returns true only for the first caller.
    pub(crate) fn request_stop(&self) -> bool {
        self.stop_requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub(crate) fn finish_polling(&self) {
        self.polling_done.store(true, Ordering::SeqCst);
        self.deleter_wakeup.notify_one();
    }

    pub(crate) fn is_polling_done(&self) -> bool {
        self.polling_done.load(Ordering::SeqCst)
    }

    pub(crate) async fn deleter_wakeup(&self) {
        self.deleter_wakeup.notified().await
    }

    /// Record a fatal error. Only the first one is kept.
    pub(crate) fn set_error(&self, error: QueueError) {
        if let Err(error) = self.error.set(error) {
            debug!("ignoring error after the first one: {}", error);
        }
    }

    pub(crate) fn error(&self) -> Option<&QueueError> {
        self.error.get()
    }

    pub(crate) fn status(&self) -> ConsumerStatus {
        if self.is_polling_done() {
            ConsumerStatus::Stopped
        } else if self.is_stop_requested() {
            ConsumerStatus::Stopping
        } else {
            ConsumerStatus::Running
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_never_goes_negative() {
        let state = ConsumerState::new("test");
        state.decrement_in_flight();
        assert_eq!(state.in_flight(), 0);

        state.increment_in_flight();
        state.increment_in_flight();
        state.decrement_in_flight();
        assert_eq!(state.in_flight(), 1);
    }

    #[test]
    fn test_stop_is_requested_once() {
        let state = ConsumerState::new("test");
        assert_eq!(state.status(), ConsumerStatus::Running);

        assert!(state.request_stop());
        assert!(!state.request_stop());
        assert_eq!(state.status(), ConsumerStatus::Stopping);

        state.finish_polling();
        assert_eq!(state.status(), ConsumerStatus::Stopped);
    }

    #[test]
    fn test_first_error_sticks() {
        let state = ConsumerState::new("test");
        assert_eq!(state.error(), None);

        state.set_error(QueueError::ReceiveError("first".to_owned()));
        state.set_error(QueueError::ReceiveError("second".to_owned()));
        assert_eq!(
            state.error(),
            Some(&QueueError::ReceiveError("first".to_owned()))
        );
    }
}
