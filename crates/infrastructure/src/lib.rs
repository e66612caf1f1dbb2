//! Infrastructure for the tradeflow pipeline: Postgres repositories,
//! the AMQP connection manager and topology, the producer service, and
//! the two background workers (outbox publisher, transaction consumer).

pub mod messaging;
pub mod persistence;
pub mod services;
