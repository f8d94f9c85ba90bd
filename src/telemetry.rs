//! Metrics recorder setup
//!
//! The collector reports through the `metrics` facade. The binary installs a
//! Prometheus recorder, served over HTTP when a listen address is configured.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Once;

pub const ICON_INGESTION_FAILURES: &str = "icon_ingestion_failures_total";
pub const ICON_PROCESSING_SECONDS: &str = "icon_processing_seconds";
pub const COLLECTOR_ITEMS: &str = "collector_items_total";
pub const COLLECTOR_BATCHES: &str = "collector_batches_total";

/// Registers descriptions for every collector metric
pub fn describe_metrics() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        describe_counter!(
            ICON_INGESTION_FAILURES,
            "Icons that could not be ingested after all attempts."
        );
        describe_histogram!(
            ICON_PROCESSING_SECONDS,
            "Time spent ingesting or copying one icon, by kind."
        );
        describe_counter!(COLLECTOR_ITEMS, "Catalog items processed.");
        describe_counter!(COLLECTOR_BATCHES, "Batches committed to the front cursor.");
    });
}

/// Handle to the installed recorder
pub enum MetricsExporter {
    /// Scraped from `/metrics` on the listen address
    Http(SocketAddr),

    /// Kept in process; rendered on shutdown
    Local(PrometheusHandle),
}

impl MetricsExporter {
    /// Installs the global Prometheus recorder
    pub fn install(listen_address: Option<SocketAddr>) -> Result<Self, BuildError> {
        let builder = PrometheusBuilder::new();
        let exporter = match listen_address {
            Some(address) => {
                builder.with_http_listener(address).install()?;
                Self::Http(address)
            }
            None => Self::Local(builder.install_recorder()?),
        };
        describe_metrics();
        Ok(exporter)
    }

    /// Prometheus exposition text, when the recorder is kept in process
    pub fn render(&self) -> Option<String> {
        match self {
            Self::Http(_) => None,
            Self::Local(handle) => Some(handle.render()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_exporter_renders_collector_metrics() {
        let exporter = MetricsExporter::install(None).unwrap();

        metrics::counter!(ICON_INGESTION_FAILURES).increment(2);
        metrics::counter!(COLLECTOR_BATCHES).increment(1);

        // Other tests report to the same global recorder, so only check the series exist
        let rendered = exporter.render().unwrap();
        assert!(rendered.contains("# TYPE icon_ingestion_failures_total counter"));
        assert!(rendered.contains("# HELP icon_ingestion_failures_total"));
        assert!(rendered.contains("collector_batches_total"));
    }
}
