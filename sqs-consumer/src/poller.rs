use std::sync::Arc;
use std::time::Duration;

use pubsub_common::health::HealthHandle;
use pubsub_common::queue::QueueClient;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::SqsConfig;
use crate::deleter::DeleteRequest;
use crate::message::SqsMessage;
use crate::state::ConsumerState;

/// Receives messages from the queue and hands them to the output stream until told to stop,
/// or until a receive call fails.
pub(crate) struct Poller<Q: QueueClient + ?Sized> {
    pub(crate) queue: Arc<Q>,
    pub(crate) config: SqsConfig,
    pub(crate) state: Arc<ConsumerState>,
    pub(crate) deleter: mpsc::Sender<DeleteRequest>,
    pub(crate) stop: mpsc::Receiver<oneshot::Sender<()>>,
    pub(crate) output: mpsc::Sender<SqsMessage>,
    pub(crate) liveness: Option<HealthHandle>,
}

impl<Q: QueueClient + ?Sized> Poller<Q> {
    pub(crate) async fn run(mut self) {
        let exit = self.poll().await;

        let Self { output, state, .. } = self;
        // Closing the output stream is how readers learn we stopped.
        drop(output);
        state.finish_polling();

        if let Some(exit) = exit {
            _ = exit.send(());
        }
        info!("stopped polling {}", state.queue());
    }

    fn report_healthy(&self) {
        if let Some(liveness) = &self.liveness {
            liveness.report_healthy();
        }
    }

    /// How often to report while waiting on the output stream: twice per liveness deadline.
    fn liveness_interval(&self) -> Duration {
        self.liveness
            .as_ref()
            .and_then(|liveness| Duration::try_from(liveness.deadline() / 2).ok())
            .filter(|interval| !interval.is_zero())
            .unwrap_or(Duration::from_secs(1))
    }

    /// Loop until stopped. Returns the stop acknowledgment channel if a stop was requested.
    async fn poll(&mut self) -> Option<oneshot::Sender<()>> {
        let labels = [("queue", self.state.queue().to_owned())];

        loop {
            self.report_healthy();

            match self.stop.try_recv() {
                Ok(exit) => return Some(exit),
                // The consumer is gone, nobody can stop us or read from us.
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }

            debug!("receiving messages");
            let messages = match self
                .queue
                .receive(self.config.max_messages, self.config.timeout_seconds)
                .await
            {
                Ok(messages) => messages,
                Err(err) => {
                    // Readers will see the stream close and should check the consumer's error.
                    error!("failed to receive messages: {}", err);
                    metrics::counter!("sqs_receive_errors_total", &labels).increment(1);
                    self.state.set_error(err);
                    return None;
                }
            };

            if messages.is_empty() {
                debug!(
                    "no messages found. sleeping for {:?}",
                    self.config.sleep_interval.0
                );
                metrics::counter!("sqs_empty_receives_total", &labels).increment(1);

                tokio::select! {
                    _ = tokio::time::sleep(self.config.sleep_interval.0) => continue,
                    exit = self.stop.recv() => return exit,
                }
            }

            info!("found {} messages", messages.len());
            metrics::counter!("sqs_messages_received_total", &labels)
                .increment(messages.len() as u64);

            let mut messages = messages.into_iter();
            while let Some(message) = messages.next() {
                let mut liveness_tick = tokio::time::interval(self.liveness_interval());
                let permit = loop {
                    tokio::select! {
                        permit = self.output.reserve() => match permit {
                            Ok(permit) => break permit,
                            Err(_) => {
                                warn!("output stream was dropped, stopping");
                                return None;
                            }
                        },
                        exit = self.stop.recv() => {
                            info!(
                                "stopping with {} received messages not handed out, they will be redelivered",
                                messages.len() + 1
                            );
                            return exit;
                        }
                        // A slow reader holds us here, we are still alive.
                        _ = liveness_tick.tick() => {
                            if let Some(liveness) = &self.liveness {
                                liveness.report_healthy();
                            }
                        }
                    }
                };

                self.state.increment_in_flight();
                permit.send(SqsMessage::new(
                    message,
                    self.config.consume_base64,
                    self.deleter.clone(),
                    self.state.clone(),
                ));
            }
        }
    }
}
