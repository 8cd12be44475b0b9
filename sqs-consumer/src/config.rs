use std::str::FromStr;
use std::time;

use envconfig::Envconfig;
use pubsub_common::aws::AwsConfig;

use crate::error::ConsumerError;

/// Number of messages requested on each receive call.
pub const DEFAULT_MAX_MESSAGES: i32 = 10;
/// Seconds a receive call waits for messages before returning empty.
pub const DEFAULT_TIMEOUT_SECONDS: i32 = 2;
/// How long to wait before polling again after an empty receive.
pub const DEFAULT_SLEEP_INTERVAL: time::Duration = time::Duration::from_secs(2);
/// Number of acknowledgments held back before a delete batch is sent. 0 deletes each message as it is done.
pub const DEFAULT_DELETE_BUFFER_SIZE: usize = 0;
pub const DEFAULT_CONSUME_BASE64: bool = true;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3302")]
    pub port: u16,

    #[envconfig(default = "30000")]
    pub liveness_deadline_ms: EnvMsDuration,

    /// Forward every consumed message to this topic before acknowledging it.
    #[envconfig(from = "SNS_TOPIC_ARN")]
    pub forward_topic: Option<String>,

    #[envconfig(nested = true)]
    pub sqs: SqsConfig,

    #[envconfig(nested = true)]
    pub aws: AwsConfig,
}

impl Config {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings of a single consumer. Immutable once the consumer is created.
#[derive(Envconfig, Clone, Debug)]
pub struct SqsConfig {
    #[envconfig(from = "SQS_QUEUE_NAME")]
    pub queue_name: String,

    #[envconfig(from = "SQS_MAX_MESSAGES", default = "10")]
    pub max_messages: i32,

    #[envconfig(from = "SQS_TIMEOUT_SECONDS", default = "2")]
    pub timeout_seconds: i32,

    #[envconfig(from = "SQS_SLEEP_INTERVAL_MS", default = "2000")]
    pub sleep_interval: EnvMsDuration,

    #[envconfig(from = "SQS_DELETE_BUFFER_SIZE", default = "0")]
    pub delete_buffer_size: usize,

    #[envconfig(from = "SQS_CONSUME_BASE64", default = "true")]
    pub consume_base64: bool,
}

impl SqsConfig {
    /// Configuration for `queue_name` with every tunable set to its default.
    pub fn new(queue_name: &str) -> Self {
        Self {
            queue_name: queue_name.to_owned(),
            max_messages: DEFAULT_MAX_MESSAGES,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            sleep_interval: EnvMsDuration(DEFAULT_SLEEP_INTERVAL),
            delete_buffer_size: DEFAULT_DELETE_BUFFER_SIZE,
            consume_base64: DEFAULT_CONSUME_BASE64,
        }
    }

    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.queue_name.is_empty() {
            return Err(ConsumerError::MissingQueueName);
        }
        if !(1..=10).contains(&self.max_messages) {
            return Err(ConsumerError::InvalidConfig(format!(
                "max messages must be between 1 and 10, got {}",
                self.max_messages
            )));
        }
        if !(0..=20).contains(&self.timeout_seconds) {
            return Err(ConsumerError::InvalidConfig(format!(
                "timeout seconds must be between 0 and 20, got {}",
                self.timeout_seconds
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}
