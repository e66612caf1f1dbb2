//! PostgreSQL persistence layer.

pub mod outbox;
pub mod transactions;

pub use outbox::PostgresOutboxRepository;
pub use transactions::PostgresTransactionRepository;
