pub mod config;
pub mod consumer;
mod deleter;
pub mod error;
pub mod message;
mod poller;
mod state;

pub use consumer::Consumer;
pub use message::SqsMessage;
pub use state::ConsumerStatus;
