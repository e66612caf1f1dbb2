//! Outbox Message Model
//!
//! Domain model for outbox messages used in the Transactional Outbox
//! Pattern. The status column is explicit; the lease is the separate
//! `last_attempt_at` timestamp, refreshed whenever a publisher claims
//! the row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Status of an outbox message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxStatus {
    /// Created but not yet claimed by any publisher.
    Pending,
    /// Claimed by exactly one publisher; `last_attempt_at` holds the lease.
    InFlight,
    /// Publish confirmed by the broker.
    Processed,
    /// Attempts exhausted. Terminal, kept for manual inspection.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::InFlight => "IN_FLIGHT",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for OutboxStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OutboxStatus::Pending),
            "IN_FLIGHT" => Ok(OutboxStatus::InFlight),
            "PROCESSED" => Ok(OutboxStatus::Processed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(DomainError::Infrastructure {
                message: format!("Invalid outbox status: {}", other),
            }),
        }
    }
}

/// An outbox message ready to be inserted into the database.
#[derive(Debug, Clone)]
pub struct OutboxMessageInsert {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl OutboxMessageInsert {
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }
}

/// A view of an outbox message as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessageRecord {
    pub id: Uuid,
    pub message_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub attempt_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxMessageRecord {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, OutboxStatus::Pending)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, OutboxStatus::InFlight)
    }

    pub fn is_processed(&self) -> bool {
        matches!(self.status, OutboxStatus::Processed)
    }

    /// Whether the in-flight lease is older than `threshold`.
    pub fn lease_expired(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        match (self.status, self.last_attempt_at) {
            (OutboxStatus::InFlight, Some(leased_at)) => now - leased_at > threshold,
            _ => false,
        }
    }
}

/// Outcome of one claimed entry's publish attempt within a cycle.
///
/// Collected per entry and persisted for the whole batch in one commit;
/// a single entry's failure never aborts the cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    /// Broker confirmed the publish.
    Processed { id: Uuid },
    /// Publish failed but attempts remain; return to Pending.
    Retry { id: Uuid, error: String },
    /// Attempts exhausted; terminal.
    Exhausted { id: Uuid, error: String },
}

/// Aggregate counts over the outbox table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxStats {
    pub pending_count: u64,
    pub in_flight_count: u64,
    pub processed_count: u64,
    pub failed_count: u64,
    pub oldest_pending_age_seconds: Option<i64>,
}

impl OutboxStats {
    pub fn total(&self) -> u64 {
        self.pending_count + self.in_flight_count + self.processed_count + self.failed_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(status: OutboxStatus, last_attempt_at: Option<DateTime<Utc>>) -> OutboxMessageRecord {
        OutboxMessageRecord {
            id: Uuid::new_v4(),
            message_type: "TransactionCreated".to_string(),
            payload: serde_json::json!({"transactionId": Uuid::nil()}),
            created_at: Utc::now(),
            status,
            attempt_count: 1,
            last_attempt_at,
            last_error: None,
            processed_at: None,
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            OutboxStatus::Pending,
            OutboxStatus::InFlight,
            OutboxStatus::Processed,
            OutboxStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<OutboxStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<OutboxStatus>().is_err());
    }

    #[test]
    fn lease_expiry_applies_only_to_in_flight_rows() {
        let now = Utc::now();
        let threshold = Duration::minutes(5);
        let old = Some(now - Duration::minutes(10));

        assert!(record(OutboxStatus::InFlight, old).lease_expired(threshold, now));
        assert!(!record(OutboxStatus::InFlight, Some(now)).lease_expired(threshold, now));
        assert!(!record(OutboxStatus::Pending, old).lease_expired(threshold, now));
        assert!(!record(OutboxStatus::InFlight, None).lease_expired(threshold, now));
    }

    #[test]
    fn record_status_checks() {
        assert!(record(OutboxStatus::Pending, None).is_pending());
        assert!(record(OutboxStatus::InFlight, None).is_in_flight());
        assert!(record(OutboxStatus::Processed, None).is_processed());
    }

    #[test]
    fn stats_total_sums_all_buckets() {
        let stats = OutboxStats {
            pending_count: 2,
            in_flight_count: 1,
            processed_count: 10,
            failed_count: 1,
            oldest_pending_age_seconds: Some(4),
        };
        assert_eq!(stats.total(), 14);
    }
}
