//!
//! Metric backends and exporters
//!
//! [`PrometheusBackend`] is the [`GaugeBackend`] used in production: every registered gauge
//! becomes a collector in a [`prometheus::Registry`] that invokes the gauge's callback each time
//! the registry is gathered. Exporters are the consumers reading that registry at their own
//! cadence. They can be selectively enabled via [`Exporter`].
//!
use crate::registry::{GaugeBackend, GaugeCallback, GaugeDef, RegistrationError};

use anyhow::{anyhow, Result};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tiny_http::{Response, Server, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::*;

//
// Prometheus names are restricted to [a-zA-Z_:][a-zA-Z0-9_:]*. Catalog names use dots, so
// lowercase and replace anything else with underscores.
//
pub fn to_safe(name: &str) -> String {
    let mut safe: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.starts_with(|c: char| c.is_ascii_digit()) {
        safe.insert(0, '_');
    }
    safe
}

//
// A gauge whose samples are produced by a callback at gather time
//
struct CallbackGauge {
    prototype: IntGaugeVec,
    opts: Opts,
    label: String,
    callback: GaugeCallback,
}

impl CallbackGauge {
    fn new(def: &GaugeDef, callback: GaugeCallback) -> prometheus::Result<Self> {
        let opts = Opts::new(to_safe(&def.name), def.help.to_string());
        let label = to_safe(&def.entity_label);
        let prototype = IntGaugeVec::new(opts.clone(), &[label.as_str()])?;
        Ok(Self {
            prototype,
            opts,
            label,
            callback,
        })
    }
}

impl Collector for CallbackGauge {
    fn desc(&self) -> Vec<&Desc> {
        self.prototype.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        // A fresh vec per gather so entities are exactly those the callback reports
        let gauges = match IntGaugeVec::new(self.opts.clone(), &[self.label.as_str()]) {
            Ok(gauges) => gauges,
            Err(e) => {
                warn!("Failed to build gauge '{}': {}", self.opts.name, e);
                return vec![];
            }
        };
        for reading in (self.callback)() {
            gauges
                .with_label_values(&[reading.entity.as_str()])
                .set(reading.value);
        }
        gauges.collect()
    }
}

///
/// [`GaugeBackend`] publishing callback gauges in a Prometheus [`Registry`]
///
/// Metric names are made Prometheus-safe with [`to_safe()`]. Names that collide after that
/// conversion are rejected like any other duplicate registration.
///
#[derive(Clone, Default)]
pub struct PrometheusBackend {
    registry: Registry,
}

impl fmt::Debug for PrometheusBackend {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PrometheusBackend").finish_non_exhaustive()
    }
}

impl PrometheusBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl GaugeBackend for PrometheusBackend {
    fn register_gauge(
        &self,
        def: &GaugeDef,
        callback: GaugeCallback,
    ) -> Result<(), RegistrationError> {
        let gauge =
            CallbackGauge::new(def, callback).map_err(|e| RegistrationError::new(&def.name, e))?;
        self.registry
            .register(Box::new(gauge))
            .map_err(|e| RegistrationError::new(&def.name, e))?;
        trace!("Prometheus gauge '{}' registered", to_safe(&def.name));
        Ok(())
    }
}

///
/// All available exporters
///
#[derive(Debug)]
pub enum Exporter {
    Log(LogExporter),
    Prometheus(PrometheusExporter),
}

impl Exporter {
    ///
    /// Start reading `registry`. The log exporter stops when `ct` is cancelled, the Prometheus
    /// exporter when it is dropped.
    ///
    pub fn serve(&self, registry: &Registry, ct: CancellationToken) -> Result<()> {
        match self {
            Exporter::Log(e) => e.serve(registry, ct),
            Exporter::Prometheus(e) => e.serve(registry),
        }
    }
}

///
/// Periodically writes every gauge sample to the initialized log at the specified [`Level`]
///
#[derive(Debug)]
pub struct LogExporter {
    log_level: Level,
    period: Duration,
}

impl LogExporter {
    pub fn new(log_level: Level, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(anyhow!("log exporter period must be non-zero"));
        }
        Ok(Self { log_level, period })
    }

    fn format(families: &[MetricFamily]) -> String {
        families
            .iter()
            .flat_map(|mf| {
                mf.get_metric().iter().map(move |m| {
                    let labels = m
                        .get_label()
                        .iter()
                        .map(|lp| format!("{}={:?}", lp.get_name(), lp.get_value()))
                        .collect::<Vec<_>>()
                        .join(",");
                    format!(
                        "[{}{{{}}}: {}]",
                        mf.get_name(),
                        labels,
                        m.get_gauge().get_value()
                    )
                })
            })
            .collect::<Vec<_>>()
            .join("")
    }

    fn do_export(&self, registry: &Registry) {
        let s = Self::format(&registry.gather());
        if s.is_empty() {
            return;
        }
        match self.log_level {
            Level::ERROR => error!("{}", s),
            Level::WARN => warn!("{}", s),
            Level::INFO => info!("{}", s),
            Level::DEBUG => debug!("{}", s),
            Level::TRACE => trace!("{}", s),
        };
    }

    fn serve(&self, registry: &Registry, ct: CancellationToken) -> Result<()> {
        let exporter = LogExporter {
            log_level: self.log_level,
            period: self.period,
        };
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(exporter.period);
            loop {
                tokio::select! {
                    biased;
                    _ = ct.cancelled() => break,
                    _ = interval.tick() => exporter.do_export(&registry),
                }
            }
            debug!("Log exporter stopped");
        });
        Ok(())
    }
}

///
/// Hosts gauge data for Prometheus scrapes at `/metrics`
///
pub struct PrometheusExporter {
    server: Arc<Server>,
    shutdown: Arc<AtomicBool>,
    worker: parking_lot::Mutex<Option<thread::JoinHandle<()>>>,
}

impl fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PrometheusExporter")
            .field("addr", &self.local_addr())
            .finish()
    }
}

impl PrometheusExporter {
    pub const DEFAULT_PORT: u16 = 9464;

    fn normalize_bind_addr(bind_addr: &str) -> String {
        const DEFAULT_ADDR: Ipv4Addr = Ipv4Addr::LOCALHOST;

        match bind_addr.rsplit_once(':') {
            None => format!("{}:{}", bind_addr, Self::DEFAULT_PORT),
            Some((a, p)) => {
                if a.is_empty() {
                    format!("{}:{}", DEFAULT_ADDR, p)
                } else if p.parse::<u16>().is_err() {
                    // Presume ipv6 bind address with no port specified
                    format!("{}:{}", bind_addr, Self::DEFAULT_PORT)
                } else {
                    bind_addr.to_string()
                }
            }
        }
    }

    pub fn new(bind_addr: &str) -> Result<Self> {
        let bind_addr = Self::normalize_bind_addr(bind_addr);
        let server = Arc::new(Server::http(&bind_addr).map_err(|e| anyhow!(e))?);
        debug!(
            "Prometheus metrics webserver bound to {}",
            server.server_addr()
        );
        Ok(Self {
            server,
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: parking_lot::Mutex::new(None),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    fn serve(&self, registry: &Registry) -> Result<()> {
        let server = self.server.clone();
        let shutdown = self.shutdown.clone();
        let registry = registry.clone();
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        let header = tiny_http::Header::from_str("Content-Type: text/plain; version=0.0.4")
            .map_err(|()| anyhow!("invalid content-type header"))?;

        let handle = thread::Builder::new()
            .name("prometheus-exporter".to_string())
            .spawn(move || tracing::dispatcher::with_default(&dispatch, || {
                const METRICS_SLUG: &str = "/metrics";
                let encoder = TextEncoder::new();

                loop {
                    match server.recv() {
                        Ok(request) => {
                            let response = match request.url() {
                                METRICS_SLUG => {
                                    let mut buffer = vec![];
                                    match encoder.encode(&registry.gather(), &mut buffer) {
                                        Ok(()) => Response::from_data(buffer)
                                            .with_header(header.clone())
                                            .boxed(),
                                        Err(e) => {
                                            warn!("Failed to encode Prometheus metrics: {}", e);
                                            Response::empty(StatusCode(500)).boxed()
                                        }
                                    }
                                }
                                _ => Response::empty(StatusCode(404)).boxed(),
                            };

                            if let Err(e) = request.respond(response) {
                                warn!("Failed to respond to Prometheus request: {}", e);
                            }
                        }
                        // unblock() wakes recv() with an error
                        Err(_) if shutdown.load(Ordering::Acquire) => break,
                        Err(err) => {
                            error!("Prometheus metrics I/O error: {:?}", err);
                            break;
                        }
                    }
                }
                debug!("Prometheus metrics webserver shutting down");
            }))?;
        *self.worker.lock() = Some(handle);
        Ok(())
    }
}

impl Drop for PrometheusExporter {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.server.unblock();
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("Prometheus metrics webserver panicked");
            }
        }
    }
}
