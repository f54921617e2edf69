//!
//! Republishes periodically polled tabular statistics as pull-based gauges
//!
//! A [`Probe`] fetches a [`Snapshot`] from a [`SnapshotSource`] for one catalog [`Family`] and
//! records each tracked attribute in the shared [`GaugeRegistry`]. The registry lazily registers
//! one callback gauge per metric name in a [`GaugeBackend`], which reads the cached values
//! whenever it exports. A [`Scheduler`] runs every probe with a fixed delay between runs.
//!
pub mod catalog;
pub mod exporters;
pub mod probe;
pub mod registry;
pub mod scheduler;
pub mod snapshot;
pub mod sources;

pub use catalog::{CatalogEntry, Family};
pub use probe::{PollReport, Probe};
pub use registry::{
    ExpiryPolicy, GaugeBackend, GaugeCallback, GaugeDef, GaugeReading, GaugeRegistry, MetricKey,
    RegistrationError,
};
pub use scheduler::Scheduler;
pub use snapshot::{FetchError, Row, RowError, Snapshot, SnapshotSource, Value};
