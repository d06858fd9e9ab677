//! `noetl-server` binary: resolves the configured persistence backend,
//! wires up [`noetl_server::AppState`], mounts the §6 REST surface plus a
//! health check and Swagger UI, and runs a periodic queue reaper
//! alongside the HTTP listener.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Json, Router};
use noetl_core::telemetry::{init_telemetry, TelemetryConfig};
use noetl_engine::persistence::{InMemoryStore, PostgresStore};
use noetl_engine::playbook::FsPlaybookCatalog;
use noetl_server::config::{Backend, ServerConfig};
use noetl_server::scheduler::{BrokerScheduler, Scheduler};
use noetl_server::{api, openapi::ApiDoc, AppState};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let _telemetry = init_telemetry(TelemetryConfig::from_env().with_service_name("noetl-server"));

    let config = ServerConfig::from_env();

    let (events, queue, tables): (
        Arc<dyn noetl_engine::persistence::EventStore>,
        Arc<dyn noetl_engine::persistence::QueueStore>,
        Arc<dyn noetl_engine::persistence::WorkflowTableStore>,
    ) = match &config.backend {
        Backend::Postgres { database_url } => {
            tracing::info!("connecting to Postgres backend");
            let store = PostgresStore::connect(database_url)
                .await
                .context("failed to connect to database")?;
            store.migrate().await.context("failed to run migrations")?;
            let store = Arc::new(store);
            (store.clone(), store.clone(), store)
        }
        Backend::Memory => {
            tracing::info!("using in-memory backend (no DATABASE_URL configured)");
            let store = Arc::new(InMemoryStore::new());
            (store.clone(), store.clone(), store)
        }
    };

    let catalog: Arc<dyn noetl_engine::playbook::PlaybookCatalog> =
        Arc::new(FsPlaybookCatalog::new(config.catalog_root.clone()));

    let scheduler: Arc<dyn Scheduler> = Arc::new(BrokerScheduler::new(
        events.clone(),
        queue.clone(),
        tables.clone(),
        catalog.clone(),
        config.inline_aggregation_max,
    ));

    let state = AppState {
        events,
        queue: queue.clone(),
        tables,
        catalog,
        scheduler,
        inline_aggregation_max: config.inline_aggregation_max,
    };

    spawn_reaper(queue, config.reap_interval);

    if !config.api_prefix.is_empty() {
        tracing::info!(prefix = %config.api_prefix, "API prefix configured");
    }

    let cors_origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
    } else {
        tracing::info!(origins = ?cors_origins, "CORS origins configured");
    }

    let api_routes = api::routes(state);
    let app = Router::new().route("/health", get(health));
    let app = app.merge(build_router_with_prefix(api_routes, &config.api_prefix));
    let app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()));

    let app = if !cors_origins.is_empty() {
        app.layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(cors_origins))
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::AUTHORIZATION,
                    header::ACCEPT,
                    header::ORIGIN,
                    header::CACHE_CONTROL,
                ])
                .allow_credentials(true),
        )
    } else {
        app
    };

    let app = app.layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("failed to bind HTTP listener")?;
    tracing::info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

/// Periodically reclaims jobs whose lease expired without a heartbeat
/// (§4.B reaper). Runs for the lifetime of the process.
fn spawn_reaper(queue: Arc<dyn noetl_engine::persistence::QueueStore>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match queue.reap_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(reclaimed = n, "reaped expired queue leases"),
                Err(e) => tracing::error!(error = %e, "queue reaper pass failed"),
            }
        }
    });
}

/// Nests `api_routes` under `api_prefix`, or leaves them unprefixed if
/// `api_prefix` is empty (extracted for testing).
fn build_router_with_prefix<S: Clone + Send + Sync + 'static>(
    api_routes: Router<S>,
    api_prefix: &str,
) -> Router<S> {
    if api_prefix.is_empty() {
        api_routes
    } else {
        Router::new().nest(api_prefix, api_routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_routes() -> Router {
        Router::new().route("/v1/test", get(|| async { "ok" }))
    }

    #[tokio::test]
    async fn test_api_prefix_empty() {
        let app = build_router_with_prefix(test_routes(), "");

        let response = app
            .oneshot(Request::builder().uri("/v1/test").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"ok");
    }

    #[tokio::test]
    async fn test_api_prefix_set() {
        let app = build_router_with_prefix(test_routes(), "/api");

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/v1/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = app
            .oneshot(Request::builder().uri("/v1/test").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }
}
