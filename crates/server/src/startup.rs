//! Wires the pool, migrations, broker topology, and the two background
//! workers together, then supervises them until shutdown.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use tradeflow_domain::outbox::OutboxRepository;
use tradeflow_domain::transaction::TransactionRepository;
use tradeflow_infrastructure::messaging::topology::declare_topology;
use tradeflow_infrastructure::messaging::{
    BrokerConnection, OutboxPublisher, OutboxPublisherConfig, TransactionConsumer,
    TransactionConsumerConfig,
};
use tradeflow_infrastructure::persistence::{
    PostgresOutboxRepository, PostgresTransactionRepository,
};

use crate::config::AppConfig;

/// Running application: worker handles plus the shutdown trigger.
pub struct App {
    shutdown_tx: watch::Sender<()>,
    publisher_handle: JoinHandle<()>,
    consumer_handle: JoinHandle<()>,
    broker: Arc<BrokerConnection>,
}

impl App {
    /// Signal both workers to stop and wait for them to drain.
    pub async fn shutdown(self) {
        info!("Shutdown requested, stopping workers");
        // Receivers may already be gone if a worker panicked.
        let _ = self.shutdown_tx.send(());

        if let Err(e) = self.publisher_handle.await {
            warn!(error = %e, "Publisher task did not exit cleanly");
        }
        if let Err(e) = self.consumer_handle.await {
            warn!(error = %e, "Consumer task did not exit cleanly");
        }

        self.broker.close().await;
        info!("Shutdown complete");
    }
}

/// Connect, migrate, declare topology, and spawn the workers.
pub async fn run(config: AppConfig) -> anyhow::Result<App> {
    info!(database_url = %config.database_url, "Connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await?;

    let transactions = PostgresTransactionRepository::new(pool.clone());
    let outbox = PostgresOutboxRepository::new(pool.clone());
    transactions.run_migrations().await?;
    outbox.run_migrations().await?;
    info!("Database migrations applied");

    let broker = Arc::new(BrokerConnection::new(config.amqp_url.clone()));
    declare_topology(&broker).await?;
    info!("Broker topology declared");

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let publisher = OutboxPublisher::new(
        Arc::new(outbox) as Arc<dyn OutboxRepository>,
        broker.clone(),
        OutboxPublisherConfig {
            poll_interval: config.poll_interval(),
            stuck_threshold: config.stuck_threshold(),
            batch_size: config.batch_size,
            max_attempts: config.max_publish_attempts,
        },
    );
    let publisher_rx = shutdown_rx.clone();
    let publisher_handle = tokio::spawn(async move {
        publisher.run(publisher_rx).await;
    });

    let consumer = TransactionConsumer::new(
        Arc::new(transactions) as Arc<dyn TransactionRepository>,
        broker.clone(),
        TransactionConsumerConfig {
            max_retries: config.max_consumer_retries,
            reconnect_delay: config.reconnect_delay(),
            prefetch: config.prefetch,
        },
    );
    let consumer_rx = shutdown_rx;
    let consumer_handle = tokio::spawn(async move {
        consumer.run(consumer_rx).await;
    });

    info!("Workers started");

    Ok(App {
        shutdown_tx,
        publisher_handle,
        consumer_handle,
        broker,
    })
}
