//! Store trait for the outbox queue.

use uuid::Uuid;

use crate::error::DomainError;
use crate::outbox::model::{OutboxMessageRecord, OutboxStats, PublishOutcome};

/// Store contract for the durable outbox queue.
///
/// The correctness of the whole pipeline hangs on two atomicity
/// requirements here: `claim_batch` must mark-and-return rows in one
/// indivisible statement (row-locked, skipping rows claimed by a
/// concurrent publisher), and insertion must happen inside the business
/// write's transaction (see the infrastructure crate's `insert_with_tx`,
/// which is necessarily sqlx-specific and lives outside this trait).
#[async_trait::async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Atomically claim up to `limit` PENDING rows: mark them IN_FLIGHT
    /// with a fresh lease and attempt_count + 1, and return them.
    /// Rows locked by a concurrent claimant are skipped, never blocked on.
    async fn claim_batch(&self, limit: usize) -> Result<Vec<OutboxMessageRecord>, DomainError>;

    /// Reset IN_FLIGHT rows whose lease is older than `threshold` back
    /// to PENDING, incrementing attempt_count and recording the rescue
    /// in last_error. Returns the number of rescued rows.
    async fn sweep_stale(&self, threshold: chrono::Duration) -> Result<u64, DomainError>;

    /// Persist one cycle's publish outcomes in a single commit.
    async fn apply_outcomes(&self, outcomes: &[PublishOutcome]) -> Result<(), DomainError>;

    /// Fetch a single message by id.
    async fn find_by_id(&self, id: &Uuid) -> Result<Option<OutboxMessageRecord>, DomainError>;

    /// Aggregate counts, used by tests and end-of-cycle logging.
    async fn get_stats(&self) -> Result<OutboxStats, DomainError>;
}
