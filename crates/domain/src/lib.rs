//! Domain model for the tradeflow transactional-outbox pipeline.
//!
//! Holds the entities, event payloads, and store traits that the
//! infrastructure crate implements against Postgres and the broker.
//! No connection pools or channels live here.

pub mod error;
pub mod events;
pub mod outbox;
pub mod transaction;

pub use error::DomainError;
