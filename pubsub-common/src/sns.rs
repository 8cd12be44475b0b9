//! # SnsPublisher
//!
//! Publish messages to an Amazon SNS topic. Payloads are base64 encoded before they are sent,
//! which is what a consumer with base64 decoding enabled expects to find in a message body.
use async_trait::async_trait;
use aws_sdk_sns::error::DisplayErrorContext;
use aws_sdk_sns::Client;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Serialize;
use thiserror::Error;

use crate::aws::{load_sdk_config, AwsConfig};

/// Enumeration of errors for operations with a Publisher.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("sns topic name is required")]
    MissingTopic,
    #[error("sns region is required")]
    MissingRegion,
    #[error("failed to serialize message")]
    SerializeError(#[from] serde_json::Error),
    #[error("failed to publish message: {0}")]
    RequestError(String),
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Emit `message` to the topic with `subject` as its subject.
    async fn publish_raw(&self, subject: &str, message: &[u8]) -> Result<(), PublishError>;
}

pub struct SnsPublisher {
    client: Client,
    topic: String,
}

impl SnsPublisher {
    /// Initialize a new SnsPublisher. If no access key is configured, credentials are read from the environment.
    pub async fn new(topic: &str, aws: &AwsConfig) -> Result<Self, PublishError> {
        if topic.is_empty() {
            return Err(PublishError::MissingTopic);
        }
        if aws.region().is_none() {
            return Err(PublishError::MissingRegion);
        }

        let sdk_config = load_sdk_config(aws).await;

        Ok(Self {
            client: Client::new(&sdk_config),
            topic: topic.to_owned(),
        })
    }

    /// Serialize `message` as JSON and emit it to the topic.
    pub async fn publish<T: Serialize + Sync>(
        &self,
        subject: &str,
        message: &T,
    ) -> Result<(), PublishError> {
        let payload = serialize_payload(message)?;
        self.publish_raw(subject, &payload).await
    }
}

#[async_trait]
impl Publisher for SnsPublisher {
    async fn publish_raw(&self, subject: &str, message: &[u8]) -> Result<(), PublishError> {
        self.client
            .publish()
            .topic_arn(&self.topic)
            .subject(subject)
            .message(encode_payload(message))
            .send()
            .await
            .map_err(|error| PublishError::RequestError(DisplayErrorContext(&error).to_string()))?;

        metrics::counter!("sns_messages_published_total").increment(1);

        Ok(())
    }
}

pub fn serialize_payload<T: Serialize>(message: &T) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn encode_payload(message: &[u8]) -> String {
    STANDARD.encode(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_payload() {
        assert_eq!(encode_payload(b"hello world"), "aGVsbG8gd29ybGQ=");
        assert_eq!(encode_payload(b""), "");
    }

    #[test]
    fn test_serialized_payload_is_json_then_base64() {
        #[derive(Serialize)]
        struct Event {
            id: u32,
            name: &'static str,
        }

        let payload = serialize_payload(&Event { id: 7, name: "signup" }).unwrap();
        assert_eq!(payload, br#"{"id":7,"name":"signup"}"#.to_vec());

        let encoded = encode_payload(&payload);
        assert_eq!(STANDARD.decode(encoded).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_new_requires_topic_and_region() {
        let aws = AwsConfig {
            region: Some("us-east-1".to_owned()),
            ..Default::default()
        };
        assert!(matches!(
            SnsPublisher::new("", &aws).await,
            Err(PublishError::MissingTopic)
        ));

        assert!(matches!(
            SnsPublisher::new("arn:aws:sns:us-east-1:000000000000:topic", &AwsConfig::default())
                .await,
            Err(PublishError::MissingRegion)
        ));
    }
}
