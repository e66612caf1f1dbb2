//! Transaction entity and the request/result shapes around it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Status of a transaction record.
///
/// Transitions only Pending -> Processed or Pending -> Failed, applied
/// by the consumer's conditional update. Never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Pending,
    Processed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "Pending",
            TransactionStatus::Processed => "Processed",
            TransactionStatus::Failed => "Failed",
        }
    }
}

impl std::str::FromStr for TransactionStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(TransactionStatus::Pending),
            "Processed" => Ok(TransactionStatus::Processed),
            "Failed" => Ok(TransactionStatus::Failed),
            other => Err(DomainError::Infrastructure {
                message: format!("Invalid transaction status: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The business fact: a transfer between two accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    pub source_account_id: String,
    pub target_account_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub status: TransactionStatus,
}

impl TransactionRecord {
    pub fn is_pending(&self) -> bool {
        matches!(self.status, TransactionStatus::Pending)
    }
}

/// A transfer request as handed over by the API layer.
///
/// Full request validation (account ownership, formats) belongs to the
/// API layer; `validate` only guards the invariants this core relies on.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferRequest {
    pub source_account_id: String,
    pub target_account_id: String,
    pub amount: Decimal,
    pub currency: String,
}

impl TransferRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::invalid("amount must be positive"));
        }
        if self.currency.len() != 3 || !self.currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(DomainError::invalid("currency must be a 3-letter code"));
        }
        if self.source_account_id == self.target_account_id {
            return Err(DomainError::invalid("source and target must differ"));
        }
        Ok(())
    }
}

/// What the producer hands back to the API layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateTransactionResult {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: Decimal, currency: &str, source: &str, target: &str) -> TransferRequest {
        TransferRequest {
            source_account_id: source.to_string(),
            target_account_id: target.to_string(),
            amount,
            currency: currency.to_string(),
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Processed,
            TransactionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TransactionStatus>().unwrap(), status);
        }
        assert!("InFlight".parse::<TransactionStatus>().is_err());
    }

    #[test]
    fn valid_request_passes() {
        let req = request(Decimal::new(500, 0), "USD", "ACC-1", "ACC-2");
        assert!(req.validate().is_ok());
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let req = request(Decimal::ZERO, "USD", "ACC-1", "ACC-2");
        assert!(req.validate().is_err());

        let req = request(Decimal::new(-1, 0), "USD", "ACC-1", "ACC-2");
        assert!(req.validate().is_err());
    }

    #[test]
    fn bad_currency_is_rejected() {
        assert!(request(Decimal::ONE, "usd", "ACC-1", "ACC-2").validate().is_err());
        assert!(request(Decimal::ONE, "USDT", "ACC-1", "ACC-2").validate().is_err());
    }

    #[test]
    fn self_transfer_is_rejected() {
        let req = request(Decimal::ONE, "USD", "ACC-1", "ACC-1");
        assert!(req.validate().is_err());
    }
}
