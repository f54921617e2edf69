//!
//! Wires sources, probes, the shared gauge registry and the scheduler together
//!
use crate::config::Schedule;

use statbridge_metrics::exporters::PrometheusBackend;
use statbridge_metrics::{Family, GaugeRegistry, Probe, Scheduler, SnapshotSource};

use anyhow::{ensure, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::*;

pub struct Agent {
    backend: Arc<PrometheusBackend>,
    registry: Arc<GaugeRegistry>,
    probes: Vec<Arc<Probe>>,
    scheduler: Scheduler,
    schedule: Schedule,
}

impl Agent {
    ///
    /// Build one probe per family, each reading from the source `source_for` returns
    ///
    pub fn new<F>(families: &[Family], schedule: Schedule, mut source_for: F) -> Result<Self>
    where
        F: FnMut(&Family) -> Result<Arc<dyn SnapshotSource>>,
    {
        ensure!(!families.is_empty(), "no statistic family is enabled");

        let backend = Arc::new(PrometheusBackend::new());
        let registry = Arc::new(GaugeRegistry::with_expiry(
            backend.clone(),
            schedule.expiry,
        ));
        let probes = families
            .iter()
            .map(|family| {
                let source = source_for(family)?;
                debug!(family = family.name, source = %source.describe(), "Probe created");
                Ok(Arc::new(Probe::new(
                    *family,
                    source,
                    registry.clone(),
                    schedule.fetch_timeout,
                )))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            backend,
            registry,
            probes,
            scheduler: Scheduler::new(),
            schedule,
        })
    }

    pub fn registry(&self) -> &Arc<GaugeRegistry> {
        &self.registry
    }

    ///
    /// The Prometheus registry every gauge is published in, for exporters to read
    ///
    pub fn prometheus_registry(&self) -> &prometheus::Registry {
        self.backend.registry()
    }

    pub fn probes(&self) -> &[Arc<Probe>] {
        &self.probes
    }

    ///
    /// Cancelled when the agent stops
    ///
    pub fn cancellation_token(&self) -> CancellationToken {
        self.scheduler.cancellation_token()
    }

    ///
    /// Begin polling every probe. Must be called from within a tokio runtime.
    ///
    pub fn start(&mut self) {
        for probe in &self.probes {
            self.scheduler.schedule(
                probe.clone(),
                self.schedule.initial_delay,
                self.schedule.delay,
            );
        }
        info!(
            "Polling {} statistic families every {:?}",
            self.probes.len(),
            self.schedule.delay
        );
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    ///
    /// Wait for polling to finish after [`stop()`](Agent::stop)
    ///
    pub async fn join(self) {
        self.scheduler.join().await;
        debug!("All probes stopped");
    }
}
