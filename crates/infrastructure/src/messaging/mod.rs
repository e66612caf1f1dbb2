//! AMQP messaging: connection management, topology, and the two
//! background workers.

pub mod connection;
pub mod consumer;
pub mod publisher;
pub mod topology;

pub use connection::{BrokerConnection, BrokerError};
pub use consumer::{TransactionConsumer, TransactionConsumerConfig};
pub use publisher::{OutboxPublisher, OutboxPublisherConfig};
