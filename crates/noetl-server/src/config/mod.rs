//! Environment-driven configuration for the `noetl-server` binary.
//!
//! Mirrors the pattern used by [`noetl_worker::WorkerConfig`] and
//! [`noetl_core::telemetry::TelemetryConfig`]: a typed struct with a
//! `from_env()` constructor, no `unwrap`/`expect` outside `main`.

use std::time::Duration;

/// Where the server stores events/queue/workflow rows: a live Postgres
/// database, or an in-process store for local development and tests
/// (§9 DESIGN NOTES: "mutable global-module ... caches" are replaced by an
/// explicit, owned store rather than ambient global state).
#[derive(Debug, Clone)]
pub enum Backend {
    Postgres { database_url: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub backend: Backend,
    pub bind_addr: String,
    pub api_prefix: String,
    pub cors_allowed_origins: Vec<String>,
    /// Root directory the file-backed playbook catalog resolves
    /// `{path}[@{version}].yaml` against (§4.E, §1 "catalog" collaborator).
    pub catalog_root: String,
    /// Interval the background sweeper calls `reap_expired()` at (§4.B).
    pub reap_interval: Duration,
    /// Threshold above which `end_loop` aggregation is offloaded to a
    /// queue job instead of running inline in the evaluator (SPEC_FULL.md
    /// Part III item 8).
    pub inline_aggregation_max: usize,
}

impl ServerConfig {
    /// Reads:
    /// - `DATABASE_URL` (Postgres backend) — absent means in-memory backend
    /// - `NOETL_BIND_ADDR` (default `0.0.0.0:8080`)
    /// - `API_PREFIX` (default empty)
    /// - `CORS_ALLOWED_ORIGINS` (comma-separated, default empty)
    /// - `NOETL_CATALOG_ROOT` (default `./playbooks`)
    /// - `NOETL_REAP_INTERVAL_SECS` (default 30)
    /// - `NOETL_INLINE_AGGREGATION_MAX` (default 50)
    pub fn from_env() -> Self {
        let backend = match std::env::var("DATABASE_URL") {
            Ok(database_url) if !database_url.is_empty() => Backend::Postgres { database_url },
            _ => Backend::Memory,
        };

        let bind_addr =
            std::env::var("NOETL_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let api_prefix = std::env::var("API_PREFIX").unwrap_or_default();

        let cors_allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| s.split(',').map(|o| o.trim().to_string()).collect())
            .unwrap_or_default();

        let catalog_root =
            std::env::var("NOETL_CATALOG_ROOT").unwrap_or_else(|_| "./playbooks".to_string());

        let reap_interval = std::env::var("NOETL_REAP_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or_else(|| Duration::from_secs(30));

        let inline_aggregation_max = std::env::var("NOETL_INLINE_AGGREGATION_MAX")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50);

        Self {
            backend,
            bind_addr,
            api_prefix,
            cors_allowed_origins,
            catalog_root,
            reap_interval,
            inline_aggregation_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_memory_backend_without_database_url() {
        std::env::remove_var("DATABASE_URL");
        let config = ServerConfig::from_env();
        assert!(matches!(config.backend, Backend::Memory));
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.inline_aggregation_max, 50);
    }
}
