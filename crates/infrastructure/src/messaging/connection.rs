//! Broker Connection Manager
//!
//! Owns a single lazily-created AMQP connection and hands out channels.
//! The cached connection is replaced under a mutex when it has closed,
//! so concurrent callers never race to open duplicates. No retry or
//! backoff lives here; the workers own their own loops.

use lapin::{Connection, ConnectionProperties};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Error type for broker connectivity.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// Internally-synchronized manager for one AMQP connection.
pub struct BrokerConnection {
    uri: String,
    connection: Mutex<Option<Connection>>,
}

impl BrokerConnection {
    /// Create a manager for the given AMQP URI. No connection is opened
    /// until the first `create_channel` call.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connection: Mutex::new(None),
        }
    }

    /// Return a fresh channel bound to a live connection, opening or
    /// replacing the underlying connection as needed.
    pub async fn create_channel(&self) -> Result<lapin::Channel, BrokerError> {
        let mut guard = self.connection.lock().await;

        let conn = match &mut *guard {
            Some(conn) if conn.status().connected() => conn,
            slot => {
                debug!(uri = %self.uri, "Opening AMQP connection");
                let conn = Connection::connect(&self.uri, ConnectionProperties::default()).await?;
                info!("AMQP connection established");
                slot.insert(conn)
            }
        };

        let channel = conn.create_channel().await?;
        Ok(channel)
    }

    /// Close the cached connection, if any. Used on shutdown so unacked
    /// deliveries are released back to the broker.
    pub async fn close(&self) {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.take() {
            if let Err(e) = conn.close(200, "shutdown").await {
                debug!(error = %e, "Error closing AMQP connection");
            }
        }
    }
}
