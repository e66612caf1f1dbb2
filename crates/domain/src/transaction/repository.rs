//! Store trait for transaction records.

use uuid::Uuid;

use crate::error::DomainError;
use crate::transaction::model::TransactionRecord;

/// Store contract for transaction records.
///
/// `mark_processed_if_pending` is the load-bearing primitive: a single
/// conditional update whose affected-row count tells the consumer
/// whether it won the status flip, lost it to an earlier delivery, or
/// is looking at a record that does not exist.
#[async_trait::async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Fetch a record by id.
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<TransactionRecord>, DomainError>;

    /// Atomically flip status Pending -> Processed.
    ///
    /// Returns the number of rows affected: 1 when this call applied
    /// the flip, 0 when the record was already past Pending or absent.
    async fn mark_processed_if_pending(&self, id: &Uuid) -> Result<u64, DomainError>;

    /// Check whether a record exists at all, regardless of status.
    async fn exists(&self, id: &Uuid) -> Result<bool, DomainError>;
}
