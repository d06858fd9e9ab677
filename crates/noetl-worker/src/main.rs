use std::sync::Arc;

use noetl_core::telemetry::{init_telemetry, TelemetryConfig};
use noetl_engine::persistence::{EventStore, PostgresStore, QueueStore};
use noetl_worker::actions::ExecutorRegistry;
use noetl_worker::runtime::WorkerPool;
use noetl_worker::{ApiClient, Backend, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_env().with_service_name("noetl-worker"));

    let config = WorkerConfig::from_env().map_err(anyhow::Error::msg)?;
    tracing::info!(worker_id = %config.pool.worker_id, "noetl-worker starting");

    let (queue, events): (Arc<dyn QueueStore>, Arc<dyn EventStore>) = match &config.backend {
        Backend::Postgres { database_url } => {
            let store = Arc::new(PostgresStore::connect(database_url).await?);
            tracing::info!("connected to postgres backend");
            (store.clone(), store)
        }
        Backend::Server { base_url } => {
            let client = Arc::new(ApiClient::new(base_url.clone()));
            tracing::info!(base_url = %base_url, "using server backend");
            (client.clone(), client)
        }
    };

    let executors = Arc::new(ExecutorRegistry::with_defaults());
    let pool = WorkerPool::new(queue, events, executors, config.pool);

    pool.start().await?;
    tracing::info!("worker ready, leasing queue jobs");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");

    pool.shutdown().await?;
    Ok(())
}
