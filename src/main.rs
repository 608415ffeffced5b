use std::future::Future;
use std::sync::Arc;

use alloy::providers::ProviderBuilder;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use usr_base_processor::config::Config;
use usr_base_processor::contract::erc20::Erc20Reader;
use usr_base_processor::handlers::binding::{bind, BindingConfig};
use usr_base_processor::handlers::context::{EventSink, HandlerContext};
use usr_base_processor::indexer::chain::ChainRunner;
use usr_base_processor::metrics::{self, PrometheusMeter};
use usr_base_processor::sink::log::LogEventSink;
use usr_base_processor::sink::postgres::PgEventSink;
use usr_base_processor::sink::SinkKind;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    dotenv::dotenv().ok();

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("USR Base processor starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    let environment = std::env::var("NODE_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .ok();
    config.log_summary(environment.as_deref());

    if config.metrics.enabled {
        let listen = config.metrics_listen()?;
        metrics::install_exporter(listen)?;
        tracing::info!(%listen, "Prometheus exporter listening");
    }

    let pool = match config.sink.kind {
        SinkKind::Postgres => Some(connect_database(&config).await?),
        SinkKind::Log => None,
    };

    let sink: Arc<dyn EventSink> = match &pool {
        Some(pool) => Arc::new(PgEventSink::new(pool.clone())),
        None => {
            tracing::info!("Log sink selected, records will not be persisted");
            Arc::new(LogEventSink)
        }
    };

    let binding = BindingConfig::from_config(&config.processor)?;
    let provider = ProviderBuilder::new().connect_http(
        config
            .chain
            .rpc_http
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL: {}", e))?,
    );

    let reader = Erc20Reader::new(provider.clone(), binding.address, config.chain.rpc_max_retries);
    let ctx = HandlerContext::new(
        binding.start_block,
        Arc::new(reader),
        sink,
        Arc::new(PrometheusMeter),
    );

    let processor = bind(binding);
    let runner = ChainRunner::new(
        provider,
        config.chain.clone(),
        config.processor.max_concurrent_handlers,
        processor,
        ctx,
        pool,
    );

    // Create shutdown signal
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(runner.run(shutdown.clone()));

    tracing::info!("Processor started. Press Ctrl+C to stop.");

    supervise(handle, tokio::signal::ctrl_c(), shutdown).await?;

    tracing::info!("USR Base processor stopped gracefully");
    Ok(())
}

/// Wait for the shutdown signal, or for the runner to stop on its own. A
/// runner error ends the process instead of leaving it idle.
async fn supervise<S>(
    mut handle: JoinHandle<eyre::Result<()>>,
    signal: S,
    shutdown: CancellationToken,
) -> eyre::Result<()>
where
    S: Future<Output = std::io::Result<()>>,
{
    let finished = tokio::select! {
        received = signal => {
            received?;
            tracing::info!("Shutdown signal received, stopping processor...");
            shutdown.cancel();
            (&mut handle).await
        }
        finished = &mut handle => finished,
    };

    match finished {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Processor failed");
            Err(e)
        }
        Err(e) => Err(eyre::eyre!("Processor task panicked: {}", e)),
    }
}

async fn connect_database(config: &Config) -> eyre::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");
    Ok(pool)
}
