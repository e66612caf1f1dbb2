//! Outbox Publisher Worker
//!
//! Background service that drains the outbox table into the broker.
//! Each cycle: sweep stale leases, claim a batch, publish each entry,
//! persist all outcomes in one commit. A single entry's failure never
//! aborts the batch, and cycle-level errors only delay the next poll.

use std::sync::Arc;
use std::time::Duration;

use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use tradeflow_domain::error::DomainError;
use tradeflow_domain::outbox::{OutboxMessageRecord, OutboxRepository, PublishOutcome};

use super::connection::BrokerConnection;
use super::topology::ORDERS_QUEUE;

const PERSISTENT_DELIVERY: u8 = 2;

/// Configuration for the Outbox Publisher.
#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    /// How often to poll for pending entries.
    pub poll_interval: Duration,
    /// Age after which an IN_FLIGHT lease is considered abandoned.
    pub stuck_threshold: Duration,
    /// Maximum number of entries claimed per cycle.
    pub batch_size: usize,
    /// Attempts before an entry is marked FAILED.
    pub max_attempts: i32,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            stuck_threshold: Duration::from_secs(300),
            batch_size: 50,
            max_attempts: 5,
        }
    }
}

/// Outbox Publisher Worker.
///
/// Runs continuously in a background task; multiple instances may run
/// against the same store, the skip-locked claim keeps them from
/// double-publishing.
pub struct OutboxPublisher {
    outbox: Arc<dyn OutboxRepository>,
    broker: Arc<BrokerConnection>,
    config: OutboxPublisherConfig,
}

impl OutboxPublisher {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        broker: Arc<BrokerConnection>,
        config: OutboxPublisherConfig,
    ) -> Self {
        Self {
            outbox,
            broker,
            config,
        }
    }

    /// Run the publisher until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) {
        info!(
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "Outbox publisher starting"
        );

        loop {
            if let Err(e) = self.run_cycle().await {
                // Store unavailable or similar; retry next interval.
                error!(error = %e, "Outbox cycle failed");
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Outbox publisher shutting down");
                    break;
                }
                _ = sleep(self.config.poll_interval) => {}
            }
        }
    }

    async fn run_cycle(&self) -> Result<(), DomainError> {
        let stale_after = chrono::Duration::from_std(self.config.stuck_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let rescued = self.outbox.sweep_stale(stale_after).await?;
        if rescued > 0 {
            warn!(count = rescued, "Sweeper rescued entries stuck at IN_FLIGHT");
        }

        let claimed = self.outbox.claim_batch(self.config.batch_size).await?;
        if claimed.is_empty() {
            debug!("No pending outbox entries");
            return Ok(());
        }

        info!(count = claimed.len(), "Claimed outbox entries for publishing");

        let outcomes = match self.broker.create_channel().await {
            Ok(channel) => {
                let mut outcomes = Vec::with_capacity(claimed.len());
                for entry in &claimed {
                    outcomes.push(self.publish_entry(&channel, entry).await);
                }
                outcomes
            }
            Err(e) => {
                // Broker down: release the whole claim back to the queue
                // (or dead-letter entries that just burned their last
                // attempt) instead of waiting for the sweeper.
                warn!(error = %e, "No broker channel; releasing claimed batch");
                claimed
                    .iter()
                    .map(|entry| self.failure_outcome(entry, &e.to_string()))
                    .collect()
            }
        };

        let published = outcomes
            .iter()
            .filter(|o| matches!(o, PublishOutcome::Processed { .. }))
            .count();
        let failed = outcomes.len() - published;

        self.outbox.apply_outcomes(&outcomes).await?;

        let stats = self.outbox.get_stats().await?;
        info!(
            published,
            failed,
            pending = stats.pending_count,
            failed_total = stats.failed_count,
            oldest_pending_age_seconds = stats.oldest_pending_age_seconds,
            "Outbox cycle committed"
        );

        Ok(())
    }

    async fn publish_entry(
        &self,
        channel: &lapin::Channel,
        entry: &OutboxMessageRecord,
    ) -> PublishOutcome {
        let payload = match serde_json::to_vec(&entry.payload) {
            Ok(bytes) => bytes,
            Err(e) => return self.failure_outcome(entry, &format!("Serialization error: {}", e)),
        };

        let publish = async {
            channel
                .basic_publish(
                    "",
                    ORDERS_QUEUE,
                    BasicPublishOptions::default(),
                    &payload,
                    BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY),
                )
                .await?
                .await?;
            Ok::<(), lapin::Error>(())
        };

        match publish.await {
            Ok(()) => {
                debug!(message_id = %entry.id, message_type = %entry.message_type, "Outbox entry published");
                PublishOutcome::Processed { id: entry.id }
            }
            Err(e) => self.failure_outcome(entry, &e.to_string()),
        }
    }

    /// Failed publish: back to PENDING while attempts remain, FAILED once
    /// the incremented count reaches the maximum.
    fn failure_outcome(&self, entry: &OutboxMessageRecord, error: &str) -> PublishOutcome {
        if entry.attempt_count + 1 >= self.config.max_attempts {
            error!(
                message_id = %entry.id,
                max_attempts = self.config.max_attempts,
                error,
                "Outbox entry exceeded max attempts, dead-lettered"
            );
            PublishOutcome::Exhausted {
                id: entry.id,
                error: error.to_string(),
            }
        } else {
            warn!(
                message_id = %entry.id,
                attempt = entry.attempt_count,
                max_attempts = self.config.max_attempts,
                error,
                "Failed to publish outbox entry"
            );
            PublishOutcome::Retry {
                id: entry.id,
                error: error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn publisher_with_max(max_attempts: i32) -> OutboxPublisher {
        struct NoopOutbox;

        #[async_trait::async_trait]
        impl OutboxRepository for NoopOutbox {
            async fn claim_batch(
                &self,
                _limit: usize,
            ) -> Result<Vec<OutboxMessageRecord>, DomainError> {
                Ok(Vec::new())
            }
            async fn sweep_stale(&self, _threshold: chrono::Duration) -> Result<u64, DomainError> {
                Ok(0)
            }
            async fn apply_outcomes(&self, _outcomes: &[PublishOutcome]) -> Result<(), DomainError> {
                Ok(())
            }
            async fn find_by_id(
                &self,
                _id: &Uuid,
            ) -> Result<Option<OutboxMessageRecord>, DomainError> {
                Ok(None)
            }
            async fn get_stats(
                &self,
            ) -> Result<tradeflow_domain::outbox::OutboxStats, DomainError> {
                unimplemented!("not used in tests")
            }
        }

        OutboxPublisher::new(
            Arc::new(NoopOutbox),
            Arc::new(BrokerConnection::new("amqp://localhost")),
            OutboxPublisherConfig {
                max_attempts,
                ..OutboxPublisherConfig::default()
            },
        )
    }

    fn entry(attempt_count: i32) -> OutboxMessageRecord {
        OutboxMessageRecord {
            id: Uuid::new_v4(),
            message_type: "TransactionCreated".to_string(),
            payload: serde_json::json!({}),
            created_at: Utc::now(),
            status: tradeflow_domain::outbox::OutboxStatus::InFlight,
            attempt_count,
            last_attempt_at: Some(Utc::now()),
            last_error: None,
            processed_at: None,
        }
    }

    struct RecordingOutbox {
        entries: std::sync::Mutex<Vec<OutboxMessageRecord>>,
        outcomes: std::sync::Mutex<Vec<PublishOutcome>>,
        stats_reads: std::sync::atomic::AtomicUsize,
    }

    impl RecordingOutbox {
        fn with_entries(entries: Vec<OutboxMessageRecord>) -> Self {
            Self {
                entries: std::sync::Mutex::new(entries),
                outcomes: std::sync::Mutex::new(Vec::new()),
                stats_reads: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl OutboxRepository for RecordingOutbox {
        async fn claim_batch(&self, _limit: usize) -> Result<Vec<OutboxMessageRecord>, DomainError> {
            Ok(std::mem::take(&mut *self.entries.lock().unwrap()))
        }
        async fn sweep_stale(&self, _threshold: chrono::Duration) -> Result<u64, DomainError> {
            Ok(0)
        }
        async fn apply_outcomes(&self, outcomes: &[PublishOutcome]) -> Result<(), DomainError> {
            self.outcomes.lock().unwrap().extend_from_slice(outcomes);
            Ok(())
        }
        async fn find_by_id(&self, _id: &Uuid) -> Result<Option<OutboxMessageRecord>, DomainError> {
            Ok(None)
        }
        async fn get_stats(&self) -> Result<tradeflow_domain::outbox::OutboxStats, DomainError> {
            self.stats_reads
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(tradeflow_domain::outbox::OutboxStats {
                pending_count: 0,
                in_flight_count: 0,
                processed_count: 0,
                failed_count: 0,
                oldest_pending_age_seconds: None,
            })
        }
    }

    #[tokio::test]
    async fn cycle_releases_claimed_batch_when_broker_is_down() {
        let outbox = Arc::new(RecordingOutbox::with_entries(vec![entry(0), entry(3)]));
        // Nothing listens on port 1, so channel creation fails and the
        // whole claim must be handed back through outcomes.
        let publisher = OutboxPublisher::new(
            outbox.clone(),
            Arc::new(BrokerConnection::new("amqp://127.0.0.1:1")),
            OutboxPublisherConfig {
                max_attempts: 4,
                ..OutboxPublisherConfig::default()
            },
        );

        publisher.run_cycle().await.unwrap();

        let outcomes = outbox.outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], PublishOutcome::Retry { .. }));
        assert!(matches!(outcomes[1], PublishOutcome::Exhausted { .. }));
        assert_eq!(
            outbox
                .stats_reads
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn defaults_match_documented_tuning() {
        let config = OutboxPublisherConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.stuck_threshold, Duration::from_secs(300));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn failure_below_max_returns_entry_to_pending() {
        let publisher = publisher_with_max(5);
        let outcome = publisher.failure_outcome(&entry(2), "connection reset");
        assert!(matches!(outcome, PublishOutcome::Retry { .. }));
    }

    #[test]
    fn failure_at_max_is_terminal() {
        let publisher = publisher_with_max(5);
        // attempt_count 4 and this failure makes 5.
        let outcome = publisher.failure_outcome(&entry(4), "connection reset");
        assert!(matches!(outcome, PublishOutcome::Exhausted { .. }));
    }
}
