//! Wire payloads carried through the broker.
//!
//! Both events are immutable value records: constructed once, serialized
//! to JSON bytes for transport, never mutated afterwards. Field names are
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transaction::TransactionStatus;

/// Message type tag stored on outbox rows carrying a created-event.
pub const TRANSACTION_CREATED_TYPE: &str = "TransactionCreated";

/// Published by the outbox publisher when a transaction has been recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionCreatedEvent {
    pub transaction_id: Uuid,
    pub source_account_id: String,
    pub target_account_id: String,
    pub amount: Decimal,
    pub currency: String,
}

/// Published by the consumer to the notifications fanout after the
/// status flip has been applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdateEvent {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub account_id: String,
    pub updated_at_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_event_serializes_camel_case() {
        let event = TransactionCreatedEvent {
            transaction_id: Uuid::nil(),
            source_account_id: "ACC-1".to_string(),
            target_account_id: "ACC-2".to_string(),
            amount: Decimal::new(50000, 2),
            currency: "USD".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("transactionId").is_some());
        assert!(json.get("sourceAccountId").is_some());
        assert_eq!(json["currency"], "USD");
    }

    #[test]
    fn update_event_round_trips() {
        let event = TransactionUpdateEvent {
            transaction_id: Uuid::new_v4(),
            status: TransactionStatus::Processed,
            account_id: "ACC-1".to_string(),
            updated_at_utc: Utc::now(),
        };

        let bytes = serde_json::to_vec(&event).unwrap();
        let parsed: TransactionUpdateEvent = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(
            serde_json::to_value(&parsed).unwrap()["status"],
            "Processed"
        );
    }
}
