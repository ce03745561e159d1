// querymind/crates/querymind/src/metrics.rs

use prometheus::{Encoder, TextEncoder, Registry, IntCounterVec, IntGauge, Histogram};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
use tracing::warn;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

struct Metrics {
    requests: IntCounterVec,
    failures: IntCounterVec,
    active_sessions: IntGauge,
    pooled_connections: IntGauge,
    generation_latency: Histogram,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    fn new() -> prometheus::Result<Self> {
        Ok(Self {
            requests: IntCounterVec::new(
                prometheus::opts!("requests_total", "Total requests per route"),
                &["route", "status"],
            )?,
            failures: IntCounterVec::new(
                prometheus::opts!("pipeline_failures_total", "Pipeline failures by error kind"),
                &["kind"],
            )?,
            active_sessions: IntGauge::new("active_sessions", "Sessions holding pooled connections")?,
            pooled_connections: IntGauge::new("pooled_connections", "Open database connections in the pool")?,
            generation_latency: Histogram::with_opts(prometheus::HistogramOpts::new(
                "query_generation_seconds",
                "Time spent synthesizing a query",
            ))?,
        })
    }
}

pub fn init_metrics() -> prometheus::Result<()> {
    if METRICS.get().is_some() {
        return Ok(());
    }
    let metrics = Metrics::new()?;
    let collectors: [Box<dyn prometheus::core::Collector>; 5] = [
        Box::new(metrics.requests.clone()),
        Box::new(metrics.failures.clone()),
        Box::new(metrics.active_sessions.clone()),
        Box::new(metrics.pooled_connections.clone()),
        Box::new(metrics.generation_latency.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            warn!("Metric registration skipped: {}", e);
        }
    }
    let _ = METRICS.set(metrics);
    Ok(())
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(m) = METRICS.get() {
        m.requests.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_failure(kind: &str) {
    if let Some(m) = METRICS.get() {
        m.failures.with_label_values(&[kind]).inc();
    }
}

pub fn set_pool_size(sessions: usize, connections: usize) {
    if let Some(m) = METRICS.get() {
        m.active_sessions.set(sessions as i64);
        m.pooled_connections.set(connections as i64);
    }
}

pub fn observe_generation(seconds: f64) {
    if let Some(m) = METRICS.get() {
        m.generation_latency.observe(seconds);
    }
}

pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
