//! Tradeflow pipeline server.
//!
//! Runs the outbox publisher and the transaction consumer side by side
//! against one PostgreSQL pool and one AMQP connection.

mod config;
mod startup;

use clap::Parser;

use config::AppConfig;

/// CLI arguments for tradeflow-server
#[derive(clap::Parser, Debug)]
#[command(name = "tradeflow-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Transactional outbox pipeline server", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = AppConfig::new()?;
    config.validate()?;

    setup_logging(args.debug, &config.log_level);

    let app = startup::run(config).await?;

    tokio::signal::ctrl_c().await?;
    app.shutdown().await;

    Ok(())
}

/// Env filter wins over both the flag and the configured level.
fn setup_logging(debug: bool, configured_level: &str) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let level = if debug { "debug" } else { configured_level };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}
