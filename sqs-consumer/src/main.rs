//! Consume an SQS queue, optionally forwarding every message to an SNS topic.
use std::sync::Arc;

use envconfig::Envconfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pubsub_common::{
    health::HealthRegistry,
    metrics::{serve, setup_metrics_router},
    sns::{Publisher, SnsPublisher},
    sqs::SqsQueue,
};
use sqs_consumer::config::Config;
use sqs_consumer::error::ConsumerError;
use sqs_consumer::{Consumer, SqsMessage};

async fn shutdown() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

async fn process_message(message: SqsMessage, publisher: Option<Arc<SnsPublisher>>) {
    let body = message.body();

    if let Some(publisher) = publisher {
        if let Err(err) = publisher.publish_raw(message.message_id(), &body).await {
            // Not acknowledged: the queue will redeliver it.
            warn!("failed to forward message {}: {}", message.message_id(), err);
            return;
        }
    } else {
        info!(
            "consumed message {} ({} bytes)",
            message.message_id(),
            body.len()
        );
    }

    let message_id = message.message_id().to_owned();
    if let Err(err) = message.done().await {
        warn!("failed to acknowledge message {}: {}", message_id, err);
    }
}

#[tokio::main]
async fn main() -> Result<(), ConsumerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env().expect("Invalid configuration:");

    let liveness = HealthRegistry::new("liveness");
    let queue = SqsQueue::new(&config.sqs.queue_name, &config.aws).await?;
    let consumer = Consumer::new(Arc::new(queue), config.sqs.clone())?.with_liveness(
        liveness.register(
            "consumer".to_string(),
            time::Duration::try_from(config.liveness_deadline_ms.0)
                .expect("liveness deadline out of range"),
        ),
    );
    let consumer = Arc::new(consumer);

    let publisher = match &config.forward_topic {
        Some(topic) => Some(Arc::new(
            SnsPublisher::new(topic, &config.aws)
                .await
                .expect("failed to initialize publisher"),
        )),
        None => None,
    };

    let bind = config.bind();
    tokio::task::spawn(async move {
        let router = setup_metrics_router(liveness).expect("failed to install metrics recorder");
        serve(router, &bind)
            .await
            .expect("failed to start serving metrics");
    });

    let mut messages = consumer.start()?;

    let stopper = consumer.clone();
    let stopped = tokio::spawn(async move {
        shutdown().await;
        stopper.stop().await
    });

    while let Some(message) = messages.recv().await {
        tokio::spawn(process_message(message, publisher.clone()));
    }

    match consumer.err() {
        None => match stopped.await {
            Ok(result) => result,
            Err(err) => {
                error!("shutdown task failed: {}", err);
                Ok(())
            }
        },
        Some(err) => {
            error!("consumer stopped: {}", err);
            stopped.abort();
            match consumer.stop().await {
                Ok(()) | Err(ConsumerError::AlreadyStopped) => {}
                Err(stop_err) => warn!("failed to stop consumer: {}", stop_err),
            }
            Err(ConsumerError::QueueError(err))
        }
    }
}
