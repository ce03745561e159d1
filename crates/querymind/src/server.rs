//! Server bootstrap: builds the shared services once and serves the router.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    api::AppState,
    config::Config,
    db::{ConnectionPool, Connector, MySqlConnector},
    llm::create_backend,
    pipeline::{Explainer, QueryPipeline},
    schema::inspector::SchemaInspector,
    session::{SessionStore, SessionTimings},
    synth::{QuerySynthesizer, SynthesisSettings},
};

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    if let Err(e) = crate::metrics::init_metrics() {
        warn!("Metrics disabled: {}", e);
    }
    cfg.print_config();

    let backend = create_backend(&cfg.generation).context("generation backend configuration is invalid")?;
    let connector: Arc<dyn Connector> = Arc::new(MySqlConnector::new(cfg.db_connect_timeout()));

    let sessions = Arc::new(SessionStore::new(
        ConnectionPool::new(connector.clone()),
        SessionTimings {
            sweep_interval: cfg.sweep_interval(),
            ttl: cfg.session_ttl(),
        },
    ));

    let generation_timeout = Duration::from_secs(cfg.generation.timeout_seconds);
    let synthesizer = QuerySynthesizer::new(
        backend.clone(),
        SynthesisSettings {
            temperature: cfg.generation.sql_temperature,
            timeout: generation_timeout,
            ..SynthesisSettings::default()
        },
    );
    let explainer = Explainer::new(backend.clone(), cfg.generation.answer_temperature, generation_timeout);
    let pipeline = Arc::new(QueryPipeline::new(sessions.clone(), synthesizer, explainer));

    let state = AppState {
        pipeline,
        connector,
        backend,
        inspector: SchemaInspector::default(),
    };

    let addr = cfg.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let app = build_router(state, Duration::from_secs(cfg.request_timeout_seconds));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, closing pooled connections");
    sessions.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

pub fn build_router(state: AppState, request_timeout: Duration) -> axum::Router {
    use axum::{
        routing::{get, post},
        Router,
    };
    use tower_http::{
        cors::{Any, CorsLayer},
        limit::RequestBodyLimitLayer,
        timeout::TimeoutLayer,
        trace::TraceLayer,
    };

    use crate::api;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any)
        .expose_headers([axum::http::HeaderName::from_static(api::SESSION_HEADER)]);

    Router::new()
        .route("/api/test-connection", post(api::test_connection))
        .route("/api/nl-query", post(api::nl_query))
        .route("/api/stream-query", post(api::stream_query))
        .route("/api/direct-sql", post(api::direct_sql))
        .route("/api/db-structure", post(api::db_structure))
        .route("/api/clear-history", post(api::clear_history))
        .route("/api/close-connections", post(api::close_connections))
        .route("/api/test-llm-connection", get(api::test_llm_connection))
        .route("/healthz", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::get_metrics))
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}
