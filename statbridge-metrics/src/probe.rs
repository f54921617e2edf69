//!
//! Probes
//!
//! A [`Probe`] is one unit of scheduled work: fetch a snapshot for its [`Family`], walk the rows
//! and record every catalogued attribute in the shared [`GaugeRegistry`]. Nothing that goes wrong
//! during a run escapes it; failures are logged and summarized in the returned [`PollReport`].
//!
use crate::catalog::Family;
use crate::registry::{GaugeDef, GaugeRegistry, RegistrationError};
use crate::snapshot::{FetchError, Row, RowError, Snapshot, SnapshotSource};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

///
/// Outcome of one [`Probe::run()`]
///
#[derive(Debug, Default)]
pub struct PollReport {
    /// Rows in the fetched snapshot
    pub rows: usize,
    /// Values written to the registry
    pub recorded: usize,
    pub row_errors: Vec<RowError>,
    pub registration_errors: Vec<RegistrationError>,
    pub fetch_error: Option<FetchError>,
}

impl PollReport {
    pub fn is_clean(&self) -> bool {
        self.row_errors.is_empty()
            && self.registration_errors.is_empty()
            && self.fetch_error.is_none()
    }
}

impl fmt::Display for PollReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} rows, {} values recorded, {} row errors, {} registration errors",
            self.rows,
            self.recorded,
            self.row_errors.len(),
            self.registration_errors.len()
        )?;
        if let Some(e) = &self.fetch_error {
            write!(f, ", fetch failed: {}", e)?;
        }
        Ok(())
    }
}

pub struct Probe {
    family: Family,
    gauges: Vec<(&'static str, GaugeDef)>,
    source: Arc<dyn SnapshotSource>,
    registry: Arc<GaugeRegistry>,
    fetch_timeout: Duration,
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Probe")
            .field("family", &self.family.name)
            .field("source", &self.source.describe())
            .field("fetch_timeout", &self.fetch_timeout)
            .finish()
    }
}

impl Probe {
    pub fn new(
        family: Family,
        source: Arc<dyn SnapshotSource>,
        registry: Arc<GaugeRegistry>,
        fetch_timeout: Duration,
    ) -> Self {
        let gauges = family
            .entries
            .iter()
            .map(|entry| (entry.attribute, family.gauge(entry)))
            .collect();
        Self {
            family,
            gauges,
            source,
            registry,
            fetch_timeout,
        }
    }

    pub fn family(&self) -> &Family {
        &self.family
    }

    ///
    /// Run one poll cycle
    ///
    pub async fn run(&self) -> PollReport {
        let span = info_span!("probe", family = self.family.name);
        self.poll().instrument(span).await
    }

    async fn poll(&self) -> PollReport {
        let mut report = PollReport::default();

        let snapshot = match self.fetch().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                trace!("No snapshot available");
                return report;
            }
            Err(e) => {
                warn!(source = %self.source.describe(), "Failed fetching snapshot: {}", e);
                report.fetch_error = Some(e);
                return report;
            }
        };

        report.rows = snapshot.len();
        for (index, row) in snapshot.iter().enumerate() {
            self.record_row(index, row, &mut report);
        }

        self.registry.evict_expired();

        if report.is_clean() {
            debug!("Poll complete: {}", report);
        } else {
            warn!("Poll complete with errors: {}", report);
        }
        report
    }

    async fn fetch(&self) -> Result<Option<Snapshot>, FetchError> {
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch()).await {
            Ok(res) => res,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout)),
        }
    }

    fn record_row(&self, index: usize, row: &Row, report: &mut PollReport) {
        if let Some(reason) = row.malformation() {
            let e = RowError::Malformed {
                index,
                reason: reason.to_owned(),
            };
            warn!(row = index, "Skipping row: {}", e);
            report.row_errors.push(e);
            return;
        }

        let entity = match row.identity(self.family.identity) {
            Ok(entity) => entity,
            Err(e) => {
                warn!(row = index, "Skipping row: {}", e);
                report.row_errors.push(e);
                return;
            }
        };

        for (attribute, gauge) in &self.gauges {
            let value = match row.int(entity, attribute) {
                Ok(value) => value,
                Err(e) => {
                    warn!(row = index, metric = %gauge.name, "Skipping attribute: {}", e);
                    report.row_errors.push(e);
                    continue;
                }
            };

            match self.registry.record_or_register(gauge, entity, value) {
                Ok(()) => report.recorded += 1,
                Err(e) => {
                    error!(metric = %e.metric, "{}", e);
                    report.registration_errors.push(e);
                }
            }
        }
    }
}
