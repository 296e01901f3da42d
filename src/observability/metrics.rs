//! Metrics collection and exposition.
//!
//! # Metrics
//! - `notfound` (counter): lookups that found no route, HTTP and TCP
//! - `requests` (histogram): proxied request latency in seconds, by
//!   service and status
//!
//! # Design Decisions
//! - The `metrics` facade is always used; without an installed recorder
//!   every update is a no-op

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;
use thiserror::Error;

use crate::config::MetricsConfig;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("unsupported metrics target {0:?}")]
    UnsupportedTarget(String),

    #[error("invalid prometheus address {0:?}")]
    InvalidAddr(String),

    #[error("prometheus exporter: {0}")]
    Exporter(#[from] BuildError),
}

/// Install the configured exporter. Returns whether one was installed.
pub fn init_metrics(config: &MetricsConfig) -> Result<bool, MetricsError> {
    match config.target.as_str() {
        "" => Ok(false),
        "prometheus" => {
            let addr: SocketAddr = config
                .prometheus_addr
                .parse()
                .map_err(|_| MetricsError::InvalidAddr(config.prometheus_addr.clone()))?;
            PrometheusBuilder::new().with_http_listener(addr).install()?;

            metrics::describe_counter!("notfound", "Requests and connections without a matching route");
            metrics::describe_histogram!("requests", metrics::Unit::Seconds, "Proxied request latency");
            tracing::info!(address = %addr, "prometheus exporter listening");
            Ok(true)
        }
        other => Err(MetricsError::UnsupportedTarget(other.to_string())),
    }
}

pub fn record_not_found() {
    metrics::counter!("notfound").increment(1);
}

pub fn record_request(service: &str, status: u16, start: Instant) {
    metrics::histogram!(
        "requests",
        "service" => service.to_string(),
        "status" => status.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}
