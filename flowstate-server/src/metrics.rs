//! Prometheus metrics for the flowstate server.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];

/// Prometheus metrics for the flowstate server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Total requests by operation.
    pub requests_total: CounterVec,
    /// Total errors by error code.
    pub errors_total: CounterVec,
    /// Request duration histogram by operation.
    pub request_duration: HistogramVec,
    /// Stored workflow definitions.
    pub definitions_total: Gauge,
    /// Stored workflow instances.
    pub instances_total: Gauge,
    /// Committed transitions.
    pub transitions_total: Counter,
    /// Transitions refused by validation.
    pub transitions_rejected_total: Counter,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Connections
        let connections_total = Counter::with_opts(Opts::new(
            "flowstate_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "flowstate_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        // Requests
        let requests_total = CounterVec::new(
            Opts::new("flowstate_requests_total", "Total requests by operation"),
            &["operation"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        // Errors
        let errors_total = CounterVec::new(
            Opts::new("flowstate_errors_total", "Total errors by error code"),
            &["code"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        // Request duration
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "flowstate_request_duration_seconds",
                "Request duration in seconds by operation",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["operation"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        // Records
        let definitions_total = Gauge::with_opts(Opts::new(
            "flowstate_definitions_total",
            "Total number of workflow definitions",
        ))?;
        registry.register(Box::new(definitions_total.clone()))?;

        let instances_total = Gauge::with_opts(Opts::new(
            "flowstate_instances_total",
            "Total number of workflow instances",
        ))?;
        registry.register(Box::new(instances_total.clone()))?;

        // Transitions
        let transitions_total = Counter::with_opts(Opts::new(
            "flowstate_transitions_total",
            "Total number of committed transitions",
        ))?;
        registry.register(Box::new(transitions_total.clone()))?;

        let transitions_rejected_total = Counter::with_opts(Opts::new(
            "flowstate_transitions_rejected_total",
            "Total number of transitions refused by validation",
        ))?;
        registry.register(Box::new(transitions_rejected_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            requests_total,
            errors_total,
            request_duration,
            definitions_total,
            instances_total,
            transitions_total,
            transitions_rejected_total,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::http::Error> {
    match req.uri().path() {
        "/metrics" => Response::builder()
            .status(StatusCode::OK)
            .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
            .body(Full::new(Bytes::from(metrics.encode()))),
        "/health" | "/healthz" => Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("OK"))),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();

        metrics.connections_total.inc();
        metrics.connections_active.inc();
        metrics
            .requests_total
            .with_label_values(&["execute_action"])
            .inc();
        metrics
            .errors_total
            .with_label_values(&["INSTANCE_NOT_FOUND"])
            .inc();
        metrics
            .request_duration
            .with_label_values(&["execute_action"])
            .observe(0.001);

        let encoded = String::from_utf8(metrics.encode()).unwrap();

        assert!(encoded.contains("flowstate_connections_total"));
        assert!(encoded.contains("flowstate_connections_active"));
        assert!(encoded.contains("flowstate_requests_total"));
        assert!(encoded.contains("flowstate_errors_total"));
        assert!(encoded.contains("flowstate_request_duration_seconds"));
    }

    #[test]
    fn test_record_gauges() {
        let metrics = Metrics::new().unwrap();

        metrics.definitions_total.set(3.0);
        metrics.instances_total.set(42.0);
        metrics.transitions_total.inc_by(7.0);
        metrics.transitions_rejected_total.inc();

        let encoded = String::from_utf8(metrics.encode()).unwrap();
        assert!(encoded.contains("flowstate_definitions_total 3"));
        assert!(encoded.contains("flowstate_instances_total 42"));
        assert!(encoded.contains("flowstate_transitions_total 7"));
        assert!(encoded.contains("flowstate_transitions_rejected_total 1"));
    }

    #[test]
    fn test_separate_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.transitions_total.inc();

        let encoded = String::from_utf8(b.encode()).unwrap();
        assert!(encoded.contains("flowstate_transitions_total 0"));
        assert!(!a.registry().gather().is_empty());
    }
}
