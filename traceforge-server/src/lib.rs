// Copyright 2025 TraceForge Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! TraceForge Server
//!
//! Wires the ingest and query crates to an axum HTTP surface: the ingest
//! service, backed by either the async worker pool or the sync event
//! processor, and the query service fronting the repository contract.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use sqlx::sqlite::SqlitePoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use traceforge_core::{IngestConfig, PricingCalculator, StoreBackend};
use traceforge_ingest::{EventProcessor, IngestService, WorkerPool};
use traceforge_query::QueryService;
use traceforge_storage::{migrate, ColumnStore, RowStore, Store};

use crate::config::ServerConfig;
use crate::state::AppState;

/// Opens the configured backend, applies its schema, and returns the
/// repository contract trait object the rest of the server depends on.
async fn build_store(config: &ServerConfig, ingest: &IngestConfig) -> Result<Arc<dyn Store>> {
    match ingest.store_backend {
        StoreBackend::Row => {
            let pool = SqlitePoolOptions::new()
                .max_connections(10)
                .connect(&config.storage.sqlite_url)
                .await
                .context("connecting to sqlite store")?;
            migrate::apply_row_schema(&pool).await.context("applying row schema")?;
            Ok(Arc::new(RowStore::new(pool)))
        }
        StoreBackend::Column => {
            let url = config
                .storage
                .postgres_url
                .as_deref()
                .context("postgres_url required for column store")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .context("connecting to postgres store")?;
            use chrono::Datelike;
            let now = chrono::Utc::now();
            migrate::apply_column_schema(&pool, now.year(), now.month())
                .await
                .context("applying column schema")?;
            Ok(Arc::new(ColumnStore::new(pool)))
        }
    }
}

fn pricing_calculator(ingest: &IngestConfig) -> Result<PricingCalculator> {
    match &ingest.pricing_table_path {
        Some(path) => PricingCalculator::load(path).context("loading pricing table"),
        None => Ok(PricingCalculator::with_builtins()),
    }
}

/// Holds the worker pool alive for the process lifetime and drains it on
/// shutdown; `None` in sync mode, where there is nothing to drain.
pub struct ServerHandle {
    pool: Option<WorkerPool>,
}

impl ServerHandle {
    pub async fn shutdown(self, timeout: Duration) {
        if let Some(pool) = self.pool {
            pool.stop(timeout).await;
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/ingest", post(api::ingest::ingest))
        .route("/traces", get(api::query::list_traces))
        .route("/traces/:id", get(api::query::get_trace_detail))
        .route("/sessions", get(api::query::list_sessions))
        .route("/analytics/summary", get(api::query::get_stats))
        .route("/analytics/usage", get(api::query::get_usage));

    let mut router = Router::new()
        .route("/health", get(api::health::health))
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(state.config.server.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state.clone(), request_deadline))
        .with_state(state.clone());

    if state.config.server.enable_cors {
        router = router.layer(build_cors_layer(&state.config.server.cors_origins));
    }

    router
}

/// Bounds every request to the configured deadline, regardless of which
/// handler runs. Timing out returns 408 rather than hanging the
/// connection.
async fn request_deadline(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(state.config.server.request_timeout(), next.run(request)).await {
        Ok(response) => response,
        Err(_) => StatusCode::REQUEST_TIMEOUT.into_response(),
    }
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let parsed: Vec<axum::http::HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(parsed)
    }
}

/// Builds state, starts the listener, and serves until the process
/// receives a shutdown signal. Returns once the listener has closed.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    config.validate().context("invalid configuration")?;

    let ingest_config = config.ingest.resolve()?;
    let store = build_store(&config, &ingest_config).await?;
    let pricing = pricing_calculator(&ingest_config)?;
    let processor = Arc::new(EventProcessor::new(store.clone(), pricing));

    let (ingest_service, handle) = match ingest_config.mode {
        traceforge_core::IngestMode::Async => {
            let pool = WorkerPool::start(
                ingest_config.buffer_size,
                ingest_config.workers,
                ingest_config.job_timeout,
                processor,
            );
            let service = IngestService::async_mode(pool.handle());
            (service, ServerHandle { pool: Some(pool) })
        }
        traceforge_core::IngestMode::Sync => {
            (IngestService::sync_mode(processor), ServerHandle { pool: None })
        }
    };

    let query_service = QueryService::new(store);

    let state = AppState {
        config: Arc::new(config.clone()),
        ingest: Arc::new(ingest_service),
        query: Arc::new(query_service),
    };

    let router = build_router(state);
    let addr = config.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("binding listener")?;

    tracing::info!(%addr, "traceforge server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    handle.shutdown(Duration::from_secs(30)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use traceforge_core::{Span, Trace, TraceStatus, TraceWithSpans};
    use traceforge_storage::{ListTracesResponse, SessionFilter, SessionSummary, Stats, StatsPeriod, TraceFilter, UsagePoint, UsageSeriesOptions};

    struct EmptyStore;

    #[async_trait]
    impl Store for EmptyStore {
        async fn create_trace(&self, trace: Trace) -> traceforge_core::Result<Trace> {
            Ok(trace)
        }
        async fn get_trace(&self, _project_id: &str, _trace_id: &str) -> traceforge_core::Result<TraceWithSpans> {
            Err(traceforge_core::Error::not_found("trace"))
        }
        async fn create_spans(&self, spans: &[Span]) -> traceforge_core::Result<usize> {
            Ok(spans.len())
        }
        async fn update_trace_status(&self, _project_id: &str, _trace_id: &str, _status: TraceStatus) -> traceforge_core::Result<()> {
            Ok(())
        }
        async fn list_traces(&self, _project_id: &str, filter: TraceFilter) -> traceforge_core::Result<ListTracesResponse> {
            Ok(ListTracesResponse { data: Vec::new(), total: 0, limit: filter.limit, offset: filter.offset })
        }
        async fn delete_all_traces(&self, _project_id: &str) -> traceforge_core::Result<Option<u64>> {
            Ok(None)
        }
        async fn list_sessions(&self, _project_id: &str, _filter: SessionFilter) -> traceforge_core::Result<Vec<SessionSummary>> {
            Ok(Vec::new())
        }
        async fn get_stats(&self, _project_id: &str, _period: StatsPeriod) -> traceforge_core::Result<Stats> {
            Ok(Stats::default())
        }
        async fn get_usage_time_series(&self, _project_id: &str, _opts: UsageSeriesOptions) -> traceforge_core::Result<Vec<UsagePoint>> {
            Ok(Vec::new())
        }
    }

    fn test_state(auth_enabled: bool) -> AppState {
        let mut config = ServerConfig::default();
        config.auth.enabled = auth_enabled;
        config.auth.api_keys.insert("sk-test".to_string(), "proj-1".to_string());

        let store: Arc<dyn Store> = Arc::new(EmptyStore);
        let processor = Arc::new(EventProcessor::new(store.clone(), traceforge_core::PricingCalculator::with_builtins()));

        AppState {
            config: Arc::new(config),
            ingest: Arc::new(IngestService::sync_mode(processor)),
            query: Arc::new(QueryService::new(store)),
        }
    }

    #[tokio::test]
    async fn health_endpoint_is_reachable_without_auth() {
        let router = build_router(test_state(true));
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ingest_without_api_key_is_rejected_when_auth_enabled() {
        let router = build_router(test_state(true));
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/ingest")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"events":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ingest_with_api_key_and_empty_batch_succeeds() {
        let router = build_router(test_state(true));
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/ingest")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer sk-test")
                    .body(Body::from(r#"{"events":[]}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_trace_detail_missing_trace_is_404() {
        let router = build_router(test_state(false));
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/traces/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
