use std::sync::{Arc, Mutex, PoisonError};

use pubsub_common::health::HealthHandle;
use pubsub_common::queue::{QueueClient, QueueError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SqsConfig;
use crate::deleter::DeleteCoordinator;
use crate::error::ConsumerError;
use crate::message::SqsMessage;
use crate::poller::Poller;
use crate::state::{ConsumerState, ConsumerStatus};

enum Lifecycle {
    NotStarted(mpsc::Receiver<oneshot::Sender<()>>),
    Running {
        poller: JoinHandle<()>,
        deleter: JoinHandle<()>,
    },
    Finished,
}

/// A consumer of an SQS queue.
///
/// `start` spawns a poll loop emitting received messages on the returned stream, and a delete
/// coordinator acknowledging messages in batches as their `done` is called. The stream closes
/// once the consumer is stopped or a receive call fails, in which case `err` returns the failure.
pub struct Consumer<Q: QueueClient + ?Sized + 'static> {
    queue: Arc<Q>,
    config: SqsConfig,
    state: Arc<ConsumerState>,
    liveness: Option<HealthHandle>,
    stop: mpsc::Sender<oneshot::Sender<()>>,
    lifecycle: Mutex<Lifecycle>,
}

impl<Q: QueueClient + ?Sized + 'static> Consumer<Q> {
    pub fn new(queue: Arc<Q>, config: SqsConfig) -> Result<Self, ConsumerError> {
        config.validate()?;

        let (stop, stop_receiver) = mpsc::channel(1);

        Ok(Self {
            state: Arc::new(ConsumerState::new(queue.name())),
            queue,
            config,
            liveness: None,
            stop,
            lifecycle: Mutex::new(Lifecycle::NotStarted(stop_receiver)),
        })
    }

    /// Report liveness on every iteration of the poll loop.
    pub fn with_liveness(mut self, liveness: HealthHandle) -> Self {
        self.liveness = Some(liveness);
        self
    }

    pub fn config(&self) -> &SqsConfig {
        &self.config
    }

    /// Start consuming messages. Can only be called once.
    pub fn start(&self) -> Result<mpsc::Receiver<SqsMessage>, ConsumerError> {
        let mut lifecycle = self
            .lifecycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.state.is_stop_requested() {
            return Err(ConsumerError::AlreadyStopped);
        }

        let stop = match std::mem::replace(&mut *lifecycle, Lifecycle::Finished) {
            Lifecycle::NotStarted(stop) => stop,
            running => {
                *lifecycle = running;
                return Err(ConsumerError::AlreadyStarted);
            }
        };

        // A single slot: the poll loop can't get ahead of the reader by more than one message.
        let (output, messages) = mpsc::channel(1);
        let (deleter, requests) = mpsc::channel(self.config.delete_buffer_size + 1);

        let coordinator = DeleteCoordinator::new(
            self.queue.clone(),
            self.config.delete_buffer_size,
            self.state.clone(),
            requests,
        );
        let poller = Poller {
            queue: self.queue.clone(),
            config: self.config.clone(),
            state: self.state.clone(),
            deleter,
            stop,
            output,
            liveness: self.liveness.clone(),
        };

        *lifecycle = Lifecycle::Running {
            deleter: tokio::spawn(coordinator.run()),
            poller: tokio::spawn(poller.run()),
        };
        info!("started consuming from {}", self.state.queue());

        Ok(messages)
    }

    /// Stop consuming messages.
    ///
    /// Waits for the poll loop to exit, then for every message it handed out to be acknowledged
    /// (or dropped) and for the resulting deletes to be sent. Messages still sitting in the output
    /// stream must be read and acknowledged for this to return.
    pub async fn stop(&self) -> Result<(), ConsumerError> {
        if !self.state.request_stop() {
            return Err(ConsumerError::AlreadyStopped);
        }

        let lifecycle = std::mem::replace(
            &mut *self
                .lifecycle
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            Lifecycle::Finished,
        );
        let Lifecycle::Running { poller, deleter } = lifecycle else {
            info!("consumer for {} stopped before starting", self.state.queue());
            return Ok(());
        };

        let (exit, exited) = oneshot::channel();
        // Fails if the poll loop already exited on its own.
        if self.stop.send(exit).await.is_ok() {
            _ = exited.await;
        }

        info!(
            "waiting for {} in flight messages to be acknowledged",
            self.state.in_flight()
        );
        if let Err(err) = poller.await {
            error!("poll loop failed: {}", err);
        }
        if let Err(err) = deleter.await {
            error!("delete coordinator failed: {}", err);
        }
        info!("consumer for {} stopped", self.state.queue());

        Ok(())
    }

    /// The error that stopped the poll loop, if any. Check it once the message stream is closed.
    pub fn err(&self) -> Option<QueueError> {
        self.state.error().cloned()
    }

    /// Number of messages handed out and not yet acknowledged.
    pub fn in_flight(&self) -> u64 {
        self.state.in_flight()
    }

    pub fn status(&self) -> ConsumerStatus {
        self.state.status()
    }
}
