//! Outbox model and store trait for the Transactional Outbox Pattern.

pub mod model;
pub mod repository;

pub use model::{OutboxMessageInsert, OutboxMessageRecord, OutboxStats, OutboxStatus, PublishOutcome};
pub use repository::OutboxRepository;
