//! Topology Setup
//!
//! Declares the durable queues, exchanges, and dead-letter bindings the
//! pipeline relies on. Idempotent; run once at startup before any
//! worker touches the broker.

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::ExchangeKind;
use tracing::info;

use super::connection::{BrokerConnection, BrokerError};

/// Main work queue carrying created-events from publisher to consumer.
pub const ORDERS_QUEUE: &str = "trade-orders";
/// Dead-letter exchange bound to the work queue.
pub const ORDERS_DEAD_LETTER_EXCHANGE: &str = "trade-orders.dlx";
/// Holding queue for poison and retry-exhausted messages.
pub const ORDERS_DEAD_LETTER_QUEUE: &str = "trade-orders.dead";
pub const ORDERS_DEAD_LETTER_ROUTING_KEY: &str = "trade-orders.dead";

/// Fanout exchange broadcasting update-events to notification sinks.
pub const NOTIFICATIONS_EXCHANGE: &str = "trade-notifications-x";
pub const NOTIFICATIONS_QUEUE: &str = "trade-notifications";

/// Per-message header carrying the consumer's explicit retry counter.
pub const RETRY_HEADER: &str = "x-retry-count";

/// Declare all queues and exchanges. Safe to run on every startup.
pub async fn declare_topology(connection: &BrokerConnection) -> Result<(), BrokerError> {
    let channel = connection.create_channel().await?;

    let durable = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };

    // Work queue, dead-lettering into the DLX on nack-without-requeue.
    let mut orders_args = FieldTable::default();
    orders_args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(ORDERS_DEAD_LETTER_EXCHANGE.into()),
    );
    orders_args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(ORDERS_DEAD_LETTER_ROUTING_KEY.into()),
    );
    channel
        .queue_declare(ORDERS_QUEUE, durable, orders_args)
        .await?;

    channel
        .exchange_declare(
            ORDERS_DEAD_LETTER_EXCHANGE,
            ExchangeKind::Direct,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(ORDERS_DEAD_LETTER_QUEUE, durable, FieldTable::default())
        .await?;

    channel
        .queue_bind(
            ORDERS_DEAD_LETTER_QUEUE,
            ORDERS_DEAD_LETTER_EXCHANGE,
            ORDERS_DEAD_LETTER_ROUTING_KEY,
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    // Notifications fanout.
    channel
        .exchange_declare(
            NOTIFICATIONS_EXCHANGE,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    channel
        .queue_declare(NOTIFICATIONS_QUEUE, durable, FieldTable::default())
        .await?;

    channel
        .queue_bind(
            NOTIFICATIONS_QUEUE,
            NOTIFICATIONS_EXCHANGE,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    info!("Broker topology declared");

    Ok(())
}
