pub mod aws;
pub mod health;
pub mod metrics;
pub mod queue;
pub mod sns;
pub mod sqs;
pub mod test_utils;
