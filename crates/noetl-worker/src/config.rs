//! Environment-driven configuration for the worker binary.

use crate::runtime::WorkerPoolConfig;

/// Where the worker gets its `QueueStore`/`EventStore` implementation from:
/// a direct Postgres connection (single-process/dev deployment) or the
/// server's REST surface over HTTP (distributed deployment, §6 — `POST
/// /events` is the endpoint that re-triggers the broker, so a worker talking
/// to Postgres directly would starve the broker of new evaluations).
#[derive(Debug, Clone)]
pub enum Backend {
    Postgres { database_url: String },
    Server { base_url: String },
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub backend: Backend,
    pub pool: WorkerPoolConfig,
}

impl WorkerConfig {
    /// Reads `NOETL_SERVER_URL` (preferred, distributed mode) or falls back
    /// to `DATABASE_URL` (direct-to-Postgres mode). `NOETL_WORKER_ID` and
    /// `NOETL_WORKER_CONCURRENCY` override the pool defaults.
    pub fn from_env() -> Result<Self, String> {
        let backend = if let Ok(base_url) = std::env::var("NOETL_SERVER_URL") {
            Backend::Server { base_url }
        } else if let Ok(database_url) = std::env::var("DATABASE_URL") {
            Backend::Postgres { database_url }
        } else {
            return Err(
                "either NOETL_SERVER_URL or DATABASE_URL must be set".to_string(),
            );
        };

        let mut pool = WorkerPoolConfig::new();
        if let Ok(worker_id) = std::env::var("NOETL_WORKER_ID") {
            pool = pool.with_worker_id(worker_id);
        }
        if let Ok(max_concurrency) = std::env::var("NOETL_WORKER_CONCURRENCY") {
            let max_concurrency: usize = max_concurrency
                .parse()
                .map_err(|_| "NOETL_WORKER_CONCURRENCY must be a positive integer".to_string())?;
            pool = pool.with_max_concurrency(max_concurrency);
        }

        Ok(Self { backend, pool })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_backend() {
        std::env::remove_var("NOETL_SERVER_URL");
        std::env::remove_var("DATABASE_URL");
        assert!(WorkerConfig::from_env().is_err());
    }
}
