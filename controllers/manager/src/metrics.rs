//! Prometheus metrics and the HTTP endpoint serving them together with the
//! liveness and readiness probes.

use crate::error::ControllerError;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Counters describing the address lifecycle.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    allocations: IntCounter,
    releases: IntCounter,
    retentions: IntCounter,
    purges: IntCounter,
    allocation_failures: IntCounterVec,
    leaked: IntCounter,
    ready: AtomicBool,
}

impl Metrics {
    /// Creates the counters and registers them in a fresh registry.
    pub fn new() -> Result<Self, ControllerError> {
        let registry = Registry::new_custom(Some("netplane".to_string()), None)?;

        let allocations = IntCounter::new("allocations_total", "Addresses handed to workloads")?;
        let releases = IntCounter::new("releases_total", "Addresses returned to their pools")?;
        let retentions = IntCounter::new("retentions_total", "Addresses kept for absent stateful workloads")?;
        let purges = IntCounter::new("purges_total", "Retained addresses dropped after scale-down or owner deletion")?;
        let allocation_failures = IntCounterVec::new(
            Opts::new("allocation_failures_total", "Failed pod address reconciliations by reason"),
            &["reason"],
        )?;
        let leaked = IntCounter::new("leaked_addresses_total", "Unreferenced addresses returned by the resync pass")?;

        registry.register(Box::new(allocations.clone()))?;
        registry.register(Box::new(releases.clone()))?;
        registry.register(Box::new(retentions.clone()))?;
        registry.register(Box::new(purges.clone()))?;
        registry.register(Box::new(allocation_failures.clone()))?;
        registry.register(Box::new(leaked.clone()))?;

        Ok(Self {
            registry,
            allocations,
            releases,
            retentions,
            purges,
            allocation_failures,
            leaked,
            ready: AtomicBool::new(false),
        })
    }

    pub fn record_allocations(&self, count: usize) {
        self.allocations.inc_by(count as u64);
    }

    pub fn record_releases(&self, count: usize) {
        self.releases.inc_by(count as u64);
    }

    pub fn record_retentions(&self, count: usize) {
        self.retentions.inc_by(count as u64);
    }

    pub fn record_purges(&self, count: usize) {
        self.purges.inc_by(count as u64);
    }

    pub fn record_leaks(&self, count: usize) {
        self.leaked.inc_by(count as u64);
    }

    pub fn record_failure(&self, reason: &str) {
        self.allocation_failures.with_label_values(&[reason]).inc();
    }

    /// Marks the manager ready once allocator state has been restored
    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Renders every registered metric in the prometheus text format.
    pub fn render(&self) -> Result<String, ControllerError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("metrics are not UTF-8: {e}")).into())
    }
}

/// Builds the `/metrics`, `/healthz` and `/readyz` routes.
pub fn router(metrics: Arc<Metrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz_handler))
        .with_state(metrics)
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn readyz_handler(State(metrics): State<Arc<Metrics>>) -> StatusCode {
    if metrics.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Serves the metrics router until the listener fails.
pub async fn serve(addr: SocketAddr, metrics: Arc<Metrics>) -> Result<(), ControllerError> {
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics endpoint listening on {}", addr);
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_rendered() {
        let metrics = Metrics::new().unwrap();
        metrics.record_allocations(2);
        metrics.record_retentions(1);
        metrics.record_failure("ExhaustedPool");
        metrics.record_failure("ExhaustedPool");

        let text = metrics.render().unwrap();
        assert!(text.contains("netplane_allocations_total 2"));
        assert!(text.contains("netplane_retentions_total 1"));
        assert!(text.contains("netplane_allocation_failures_total{reason=\"ExhaustedPool\"} 2"));
    }

    #[test]
    fn test_readiness_flag() {
        let metrics = Metrics::new().unwrap();
        assert!(!metrics.is_ready());
        metrics.set_ready();
        assert!(metrics.is_ready());
    }

    #[tokio::test]
    async fn test_readyz_reflects_restore() {
        let metrics = Arc::new(Metrics::new().unwrap());
        assert_eq!(readyz_handler(State(Arc::clone(&metrics))).await, StatusCode::SERVICE_UNAVAILABLE);
        metrics.set_ready();
        assert_eq!(readyz_handler(State(metrics)).await, StatusCode::OK);
    }
}
