//! Consumer Worker
//!
//! Subscribes to the work queue, applies the idempotent status flip to
//! the referenced transaction, and broadcasts an update-event on the
//! notifications fanout. Poison payloads and retry-exhausted messages
//! are dead-lettered via nack-without-requeue; transient failures are
//! re-queued by republishing with an explicit retry-count header. The
//! subscription channel reconnects forever with a fixed delay.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use tradeflow_domain::error::DomainError;
use tradeflow_domain::events::{TransactionCreatedEvent, TransactionUpdateEvent};
use tradeflow_domain::transaction::{TransactionRepository, TransactionStatus};

use super::connection::{BrokerConnection, BrokerError};
use super::topology::{NOTIFICATIONS_EXCHANGE, ORDERS_QUEUE, RETRY_HEADER};

const PERSISTENT_DELIVERY: u8 = 2;
const CONSUMER_TAG: &str = "tradeflow-consumer";

/// Configuration for the Consumer Worker.
#[derive(Debug, Clone)]
pub struct TransactionConsumerConfig {
    /// Explicit retries (via the retry header) before dead-lettering.
    pub max_retries: i32,
    /// Delay between reconnect attempts after channel loss.
    pub reconnect_delay: Duration,
    /// In-flight deliveries per worker instance.
    pub prefetch: u16,
}

impl Default for TransactionConsumerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            reconnect_delay: Duration::from_secs(5),
            prefetch: 1,
        }
    }
}

/// Result of applying one created-event against the store.
#[derive(Debug, PartialEq, Eq)]
enum ApplyResult {
    /// This delivery won the Pending -> Processed flip.
    Applied,
    /// An earlier delivery already flipped it; expected under
    /// at-least-once semantics.
    AlreadyProcessed,
    /// No such record yet; possibly a commit-visibility race.
    NotFound,
}

/// Consumer Worker for created-events.
pub struct TransactionConsumer {
    transactions: Arc<dyn TransactionRepository>,
    broker: Arc<BrokerConnection>,
    config: TransactionConsumerConfig,
}

impl TransactionConsumer {
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        broker: Arc<BrokerConnection>,
        config: TransactionConsumerConfig,
    ) -> Self {
        Self {
            transactions,
            broker,
            config,
        }
    }

    /// Run the consumer until the shutdown signal fires, reconnecting
    /// on channel loss indefinitely.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) {
        info!(queue = ORDERS_QUEUE, "Consumer starting");

        loop {
            match self.consume_until_disconnect(&mut shutdown).await {
                Ok(ConsumeExit::Shutdown) => {
                    info!("Consumer shutting down");
                    break;
                }
                Ok(ConsumeExit::ChannelLost) => {
                    warn!(
                        delay = ?self.config.reconnect_delay,
                        "Consumer channel lost, reconnecting"
                    );
                }
                Err(e) => {
                    error!(
                        error = %e,
                        delay = ?self.config.reconnect_delay,
                        "Consumer connection error, retrying"
                    );
                }
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Consumer shutting down");
                    break;
                }
                _ = sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn consume_until_disconnect(
        &self,
        shutdown: &mut watch::Receiver<()>,
    ) -> Result<ConsumeExit, BrokerError> {
        let channel = self.broker.create_channel().await?;

        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        let mut consumer = channel
            .basic_consume(
                ORDERS_QUEUE,
                CONSUMER_TAG,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!("Consumer connected, waiting for messages");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    // Close cleanly so unacked deliveries are released.
                    if let Err(e) = channel.close(200, "shutdown").await {
                        warn!(error = %e, "Error closing consumer channel");
                    }
                    return Ok(ConsumeExit::Shutdown);
                }
                delivery = consumer.next() => {
                    match delivery {
                        Some(Ok(delivery)) => self.handle_delivery(&channel, delivery).await,
                        Some(Err(e)) => {
                            warn!(error = %e, "Delivery stream error");
                            return Ok(ConsumeExit::ChannelLost);
                        }
                        None => return Ok(ConsumeExit::ChannelLost),
                    }
                }
            }
        }
    }

    /// Per-message state machine:
    /// Received -> Validated -> Applied -> Acknowledged, or
    /// Received -> Rejected(-> DLQ).
    async fn handle_delivery(&self, channel: &lapin::Channel, delivery: Delivery) {
        let event: TransactionCreatedEvent = match serde_json::from_slice(&delivery.data) {
            Ok(event) => event,
            Err(e) => {
                // Poison: the dead-letter binding captures it verbatim.
                error!(error = %e, "Poison message (bad JSON), dead-lettering");
                nack_no_requeue(&delivery).await;
                return;
            }
        };

        if event.transaction_id.is_nil() {
            warn!("Empty transaction id received, dropping");
            ack(&delivery).await;
            return;
        }

        info!(transaction_id = %event.transaction_id, "Processing created-event");

        match self.apply(channel, &event).await {
            Ok(ApplyResult::Applied) => {
                info!(transaction_id = %event.transaction_id, "Transaction processed");
                ack(&delivery).await;
            }
            Ok(ApplyResult::AlreadyProcessed) => {
                // Duplicate delivery; the earlier one already published
                // the notification.
                info!(
                    transaction_id = %event.transaction_id,
                    "Already processed, skipping (idempotent)"
                );
                ack(&delivery).await;
            }
            Ok(ApplyResult::NotFound) => {
                // The producer's commit may not be visible yet; retry a
                // bounded number of times before dropping.
                let retries = retry_count(delivery.properties.headers(), delivery.redelivered);
                if retries < self.config.max_retries {
                    warn!(
                        transaction_id = %event.transaction_id,
                        retries,
                        "Transaction not found, retrying"
                    );
                    self.republish_with_retry(channel, &delivery, retries).await;
                    nack_no_requeue(&delivery).await;
                } else {
                    warn!(
                        transaction_id = %event.transaction_id,
                        retries,
                        "Transaction not found after retries, dropping"
                    );
                    ack(&delivery).await;
                }
            }
            Err(e) => {
                error!(transaction_id = %event.transaction_id, error = %e, "Processing error");

                let retries = retry_count(delivery.properties.headers(), delivery.redelivered);
                if retries >= self.config.max_retries {
                    error!(
                        transaction_id = %event.transaction_id,
                        retries,
                        "Max retries exceeded, dead-lettering"
                    );
                    nack_no_requeue(&delivery).await;
                } else {
                    self.republish_with_retry(channel, &delivery, retries).await;
                    nack_no_requeue(&delivery).await;
                }
            }
        }
    }

    /// Conditional status flip plus notification publish on success.
    async fn apply(
        &self,
        channel: &lapin::Channel,
        event: &TransactionCreatedEvent,
    ) -> Result<ApplyResult, DomainError> {
        let rows = self
            .transactions
            .mark_processed_if_pending(&event.transaction_id)
            .await?;

        if rows == 1 {
            let update = TransactionUpdateEvent {
                transaction_id: event.transaction_id,
                status: TransactionStatus::Processed,
                account_id: event.source_account_id.clone(),
                updated_at_utc: Utc::now(),
            };

            let payload = serde_json::to_vec(&update)?;
            channel
                .basic_publish(
                    NOTIFICATIONS_EXCHANGE,
                    "",
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY),
                )
                .await
                .map_err(|e| DomainError::Infrastructure {
                    message: format!("Notification publish failed: {}", e),
                })?
                .await
                .map_err(|e| DomainError::Infrastructure {
                    message: format!("Notification publish failed: {}", e),
                })?;

            return Ok(ApplyResult::Applied);
        }

        if self.transactions.exists(&event.transaction_id).await? {
            Ok(ApplyResult::AlreadyProcessed)
        } else {
            Ok(ApplyResult::NotFound)
        }
    }

    /// Republish the same payload to the same queue with the retry
    /// counter incremented; the caller then nacks the original, which
    /// decouples our retry budget from the broker's redelivery count.
    async fn republish_with_retry(
        &self,
        channel: &lapin::Channel,
        delivery: &Delivery,
        current_retries: i32,
    ) {
        let mut headers = delivery
            .properties
            .headers()
            .clone()
            .unwrap_or_default();
        headers.insert(RETRY_HEADER.into(), AMQPValue::LongInt(current_retries + 1));

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY)
            .with_headers(headers);

        let result = async {
            channel
                .basic_publish(
                    "",
                    delivery.routing_key.as_str(),
                    BasicPublishOptions::default(),
                    &delivery.data,
                    properties,
                )
                .await?
                .await?;
            Ok::<(), lapin::Error>(())
        }
        .await;

        if let Err(e) = result {
            // The nacked original still lands in the DLQ, so nothing is
            // silently lost.
            warn!(error = %e, "Failed to republish retry, original goes to DLQ");
        }
    }
}

enum ConsumeExit {
    Shutdown,
    ChannelLost,
}

async fn ack(delivery: &Delivery) {
    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
        warn!(error = %e, "Failed to ack delivery");
    }
}

async fn nack_no_requeue(delivery: &Delivery) {
    let options = BasicNackOptions {
        requeue: false,
        ..BasicNackOptions::default()
    };
    if let Err(e) = delivery.nack(options).await {
        warn!(error = %e, "Failed to nack delivery");
    }
}

/// Read the explicit retry counter from the transport headers. Absent
/// header falls back to the broker's redelivered flag.
fn retry_count(headers: &Option<FieldTable>, redelivered: bool) -> i32 {
    if let Some(table) = headers {
        let value = table
            .inner()
            .iter()
            .find(|(key, _)| key.as_str() == RETRY_HEADER)
            .map(|(_, value)| value);

        if let Some(value) = value {
            return match value {
                AMQPValue::LongInt(i) => *i,
                AMQPValue::LongLongInt(l) => *l as i32,
                AMQPValue::ShortInt(s) => i32::from(*s),
                AMQPValue::LongString(s) => std::str::from_utf8(s.as_bytes())
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                AMQPValue::ByteArray(bytes) => std::str::from_utf8(bytes.as_slice())
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0),
                _ => 0,
            };
        }
    }

    if redelivered {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: AMQPValue) -> Option<FieldTable> {
        let mut table = FieldTable::default();
        table.insert(RETRY_HEADER.into(), value);
        Some(table)
    }

    #[test]
    fn defaults_match_documented_tuning() {
        let config = TransactionConsumerConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(5));
        assert_eq!(config.prefetch, 1);
    }

    #[test]
    fn retry_count_reads_integer_headers() {
        assert_eq!(retry_count(&headers_with(AMQPValue::LongInt(3)), false), 3);
        assert_eq!(
            retry_count(&headers_with(AMQPValue::LongLongInt(4)), false),
            4
        );
        assert_eq!(retry_count(&headers_with(AMQPValue::ShortInt(2)), false), 2);
    }

    #[test]
    fn retry_count_parses_string_headers() {
        assert_eq!(
            retry_count(&headers_with(AMQPValue::LongString("7".into())), false),
            7
        );
        assert_eq!(
            retry_count(
                &headers_with(AMQPValue::LongString("not-a-number".into())),
                false
            ),
            0
        );
    }

    #[test]
    fn retry_count_falls_back_to_redelivered_flag() {
        assert_eq!(retry_count(&None, false), 0);
        assert_eq!(retry_count(&None, true), 1);
        assert_eq!(retry_count(&Some(FieldTable::default()), true), 1);
    }

    #[test]
    fn retry_count_ignores_unrelated_headers() {
        let mut table = FieldTable::default();
        table.insert("x-other".into(), AMQPValue::LongInt(9));
        assert_eq!(retry_count(&Some(table), false), 0);
    }
}
