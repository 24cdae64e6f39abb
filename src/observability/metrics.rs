//! Metrics for the enrichment cascade.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op.

use std::fmt;
use std::net::SocketAddr;

use tracing::{info, warn};

pub const ENV_METRICS_ADDR: &str = "GEO_ENRICH_METRICS_ADDR";

/// Every metric name used in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    BatchesProcessed,
    RowsTotal,
    RowsResolved,
    RegionFailures,
    GeocoderRequests,
    GeocoderRequestDuration,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::BatchesProcessed => "geo_enrich_batches_total",
            MetricName::RowsTotal => "geo_enrich_rows_total",
            MetricName::RowsResolved => "geo_enrich_rows_resolved_total",
            MetricName::RegionFailures => "geo_enrich_region_failures_total",
            MetricName::GeocoderRequests => "geo_enrich_geocoder_requests_total",
            MetricName::GeocoderRequestDuration => {
                "geo_enrich_geocoder_request_duration_seconds"
            }
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            BatchesProcessed,
            RowsTotal,
            RowsResolved,
            RegionFailures,
            GeocoderRequests,
            GeocoderRequestDuration,
        ]
        .into_iter()
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Installs the Prometheus exporter when `GEO_ENRICH_METRICS_ADDR` is set.
pub fn init_metrics() {
    let Ok(addr) = std::env::var(ENV_METRICS_ADDR) else {
        return;
    };
    let addr: SocketAddr = match addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Invalid metrics address, exporter disabled");
            return;
        }
    };
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => info!("Prometheus exporter listening on http://{}/metrics", addr),
        Err(e) => warn!(error = %e, "Prometheus exporter install failed"),
    }
}

pub mod cascade {
    use super::MetricName;

    pub fn batch_processed(rows: usize) {
        ::metrics::counter!(MetricName::BatchesProcessed.as_str()).increment(1);
        ::metrics::counter!(MetricName::RowsTotal.as_str()).increment(rows as u64);
    }

    pub fn rows_resolved(stage: &'static str, rows: usize) {
        ::metrics::counter!(MetricName::RowsResolved.as_str(), "stage" => stage)
            .increment(rows as u64);
    }

    pub fn region_failed(region: &str) {
        ::metrics::counter!(MetricName::RegionFailures.as_str(), "region" => region.to_string())
            .increment(1);
    }
}

pub mod geocoder {
    use std::time::Duration;

    use super::MetricName;

    /// `outcome` is one of accepted, rejected, empty, error.
    pub fn request(outcome: &'static str) {
        ::metrics::counter!(MetricName::GeocoderRequests.as_str(), "outcome" => outcome)
            .increment(1);
    }

    pub fn request_duration(elapsed: Duration) {
        ::metrics::histogram!(MetricName::GeocoderRequestDuration.as_str())
            .record(elapsed.as_secs_f64());
    }
}
