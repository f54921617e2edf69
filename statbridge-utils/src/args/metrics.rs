use statbridge_metrics::exporters::*;

use std::time::Duration;
use tracing::*;

#[derive(Debug, clap::Args)]
pub struct MetricsArgGroup {
    /// Log every gauge sample at the DEBUG level (-v)
    #[arg(long)]
    metrics_log: bool,

    /// Seconds between two logs of the gauge samples
    #[arg(long, requires = "metrics_log", default_value_t = 60)]
    metrics_log_interval_secs: u64,

    /// Serve Prometheus metrics at the given (optional) bind address. Defaults to 127.0.0.1:9464
    #[arg(long, num_args = 0..=1, default_value = None, default_missing_value = "127.0.0.1:9464")]
    metrics_prometheus: Option<String>,
}

impl MetricsArgGroup {
    ///
    /// Build the requested exporters. An exporter that fails to set up is logged and skipped.
    ///
    pub fn to_exporters(&self) -> Vec<Exporter> {
        let mut exporters = vec![];
        if self.metrics_log {
            let period = Duration::from_secs(self.metrics_log_interval_secs);
            match LogExporter::new(Level::DEBUG, period) {
                Ok(le) => exporters.push(Exporter::Log(le)),
                Err(err) => warn!("Failed to setup Log exporter: {}, disabling", err),
            }
        }
        if let Some(bind_addr) = &self.metrics_prometheus {
            match PrometheusExporter::new(bind_addr) {
                Ok(pe) => exporters.push(Exporter::Prometheus(pe)),
                Err(err) => warn!("Failed to setup Prometheus exporter: {}, disabling", err),
            }
        }
        exporters
    }
}
