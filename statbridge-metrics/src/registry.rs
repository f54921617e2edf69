//!
//! Gauge registry
//!
//! The [`GaugeRegistry`] is the bridge between polled snapshots and a pull-based metrics
//! backend. The polling side writes the latest value of every `(entity, metric)` time series with
//! [`record_or_register()`](GaugeRegistry::record_or_register). The first time a metric name is
//! seen, a callback gauge is installed in the [`GaugeBackend`]; the backend invokes that callback
//! whenever it exports, from its own threads, and the callback reports every entity currently
//! cached for that metric.
//!
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::*;

///
/// Describes a gauge published in the backend
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeDef {
    pub name: String,
    pub help: String,
    /// Label under which each data point carries its entity id
    pub entity_label: String,
}

impl GaugeDef {
    pub fn new(name: &str, help: &str, entity_label: &str) -> Self {
        // Some backends require help text, fall back to the name
        let help = if help.is_empty() { name } else { help };
        Self {
            name: name.to_owned(),
            help: help.to_owned(),
            entity_label: entity_label.to_owned(),
        }
    }
}

///
/// Identity of one time series
///
/// Ordered by metric name first so that all series of a metric are contiguous.
///
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub metric: String,
    pub entity: String,
}

impl MetricKey {
    pub fn new(entity: &str, metric: &str) -> Self {
        Self {
            metric: metric.to_owned(),
            entity: entity.to_owned(),
        }
    }

    // No key of `metric` sorts before this one
    fn first_of(metric: &str) -> Self {
        Self::new("", metric)
    }
}

///
/// One data point emitted by a gauge callback
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GaugeReading {
    pub entity: String,
    pub value: i64,
}

impl GaugeReading {
    pub fn new(entity: &str, value: i64) -> Self {
        Self {
            entity: entity.to_owned(),
            value,
        }
    }
}

///
/// Invoked by a backend at export time, must not block
///
pub type GaugeCallback = Box<dyn Fn() -> Vec<GaugeReading> + Send + Sync + 'static>;

///
/// A backend rejected a gauge registration
///
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed to register gauge '{metric}': {reason}")]
pub struct RegistrationError {
    pub metric: String,
    pub reason: String,
}

impl RegistrationError {
    pub fn new(metric: &str, reason: impl fmt::Display) -> Self {
        Self {
            metric: metric.to_owned(),
            reason: reason.to_string(),
        }
    }
}

///
/// A metrics backend supporting pull-based gauges
///
/// [`GaugeRegistry`] calls [`register_gauge()`](GaugeBackend::register_gauge) at most once per
/// metric name for its whole lifetime.
///
pub trait GaugeBackend: Send + Sync {
    fn register_gauge(
        &self,
        def: &GaugeDef,
        callback: GaugeCallback,
    ) -> Result<(), RegistrationError>;
}

///
/// What happens to series whose entity stops appearing in snapshots
///
/// The default, [`Never`](ExpiryPolicy::Never), keeps reporting the last known value forever.
/// [`After`](ExpiryPolicy::After) hides a series once it has not been recorded for the given
/// duration and lets [`GaugeRegistry::evict_expired()`] drop it from the cache.
///
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryPolicy {
    #[default]
    Never,
    After(Duration),
}

impl ExpiryPolicy {
    fn is_expired(&self, updated: Instant, now: Instant) -> bool {
        match self {
            ExpiryPolicy::Never => false,
            ExpiryPolicy::After(ttl) => now.saturating_duration_since(updated) > *ttl,
        }
    }
}

#[derive(Debug)]
struct Sample {
    value: i64,
    updated: Instant,
}

#[derive(Debug, Default)]
struct Cache {
    registered: HashSet<String>,
    last_value: BTreeMap<MetricKey, Sample>,
}

impl Cache {
    fn readings(&self, metric: &str, expiry: ExpiryPolicy, now: Instant) -> Vec<GaugeReading> {
        self.last_value
            .range(MetricKey::first_of(metric)..)
            .take_while(|(key, _)| key.metric == metric)
            .filter(|(_, sample)| !expiry.is_expired(sample.updated, now))
            .map(|(key, sample)| GaugeReading::new(&key.entity, sample.value))
            .collect()
    }
}

///
/// Last-value cache plus lazy, at-most-once gauge registration
///
/// Constructed once at startup and shared by reference (`Arc<GaugeRegistry>`) with every
/// [`Probe`](crate::Probe). One lock guards both the registered set and the value cache; each
/// [`record_or_register()`](GaugeRegistry::record_or_register) is its own atomic unit.
///
pub struct GaugeRegistry {
    backend: Arc<dyn GaugeBackend>,
    cache: Arc<Mutex<Cache>>,
    expiry: ExpiryPolicy,
}

impl fmt::Debug for GaugeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("GaugeRegistry")
            .field("registered", &cache.registered.len())
            .field("series", &cache.last_value.len())
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl GaugeRegistry {
    pub fn new(backend: Arc<dyn GaugeBackend>) -> Self {
        Self::with_expiry(backend, ExpiryPolicy::Never)
    }

    pub fn with_expiry(backend: Arc<dyn GaugeBackend>, expiry: ExpiryPolicy) -> Self {
        if let ExpiryPolicy::After(ttl) = expiry {
            info!("Series not recorded for {:?} will be expired", ttl);
        }
        Self {
            backend,
            cache: Arc::new(Mutex::new(Cache::default())),
            expiry,
        }
    }

    ///
    /// Record the latest `value` of `gauge` for `entity`, registering the gauge with the backend
    /// the first time its name is seen
    ///
    /// The value is cached before registration so a callback firing immediately after
    /// registration already sees it. A registration failure is returned to the caller; the metric
    /// name stays marked as registered and is never retried.
    ///
    pub fn record_or_register(
        &self,
        gauge: &GaugeDef,
        entity: &str,
        value: i64,
    ) -> Result<(), RegistrationError> {
        let first_sight = {
            let mut cache = self.cache.lock();
            cache.last_value.insert(
                MetricKey::new(entity, &gauge.name),
                Sample {
                    value,
                    updated: Instant::now(),
                },
            );
            !cache.registered.contains(&gauge.name) && cache.registered.insert(gauge.name.clone())
        };

        // The lock must not be held here: backends may hold their own lock while invoking
        // callbacks, and every callback takes ours.
        if first_sight {
            debug!(metric = %gauge.name, "Registering gauge");
            let cache = Arc::clone(&self.cache);
            let metric = gauge.name.clone();
            let expiry = self.expiry;
            self.backend.register_gauge(
                gauge,
                Box::new(move || cache.lock().readings(&metric, expiry, Instant::now())),
            )?;
        }
        Ok(())
    }

    ///
    /// The data points a callback for `metric` would emit right now, sorted by entity
    ///
    pub fn readings(&self, metric: &str) -> Vec<GaugeReading> {
        self.cache
            .lock()
            .readings(metric, self.expiry, Instant::now())
    }

    pub fn is_registered(&self, metric: &str) -> bool {
        self.cache.lock().registered.contains(metric)
    }

    ///
    /// Number of cached time series
    ///
    pub fn len(&self) -> usize {
        self.cache.lock().last_value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    ///
    /// Drop cached series that have expired under the configured [`ExpiryPolicy`], returning how
    /// many were removed. Registered gauges are kept.
    ///
    pub fn evict_expired(&self) -> usize {
        if self.expiry == ExpiryPolicy::Never {
            return 0;
        }

        let now = Instant::now();
        let mut cache = self.cache.lock();
        let before = cache.last_value.len();
        cache
            .last_value
            .retain(|_, sample| !self.expiry.is_expired(sample.updated, now));
        let evicted = before - cache.last_value.len();
        if evicted > 0 {
            debug!("Evicted {} expired series", evicted);
        }
        evicted
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::collections::HashMap;
    use std::thread;
    use test_log::test;

    ///
    /// Backend that keeps callbacks in memory so tests can play the exporter
    ///
    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        callbacks: Mutex<HashMap<String, Arc<GaugeCallback>>>,
        registrations: Mutex<Vec<String>>,
        reject: HashSet<String>,
    }

    impl RecordingBackend {
        pub(crate) fn rejecting(metric: &str) -> Self {
            Self {
                reject: HashSet::from([metric.to_owned()]),
                ..Default::default()
            }
        }

        pub(crate) fn registrations(&self) -> Vec<String> {
            self.registrations.lock().clone()
        }

        pub(crate) fn export(&self, metric: &str) -> Vec<GaugeReading> {
            let callback = self.callbacks.lock().get(metric).cloned();
            callback.map(|cb| cb()).unwrap_or_default()
        }
    }

    impl GaugeBackend for RecordingBackend {
        fn register_gauge(
            &self,
            def: &GaugeDef,
            callback: GaugeCallback,
        ) -> Result<(), RegistrationError> {
            self.registrations.lock().push(def.name.clone());
            if self.reject.contains(&def.name) {
                return Err(RegistrationError::new(&def.name, "duplicate name"));
            }
            self.callbacks
                .lock()
                .insert(def.name.clone(), Arc::new(callback));
            Ok(())
        }
    }

    fn gauge(name: &str) -> GaugeDef {
        GaugeDef::new(name, "", "process")
    }

    fn setup() -> (Arc<RecordingBackend>, GaugeRegistry) {
        let backend = Arc::new(RecordingBackend::default());
        let registry = GaugeRegistry::new(backend.clone());
        (backend, registry)
    }

    #[test]
    fn help_defaults_to_name() {
        assert_eq!(gauge("created").help, "created");
        assert_eq!(GaugeDef::new("created", "Created", "p").help, "Created");
    }

    #[test]
    fn registers_once_and_reports_every_entity() {
        let (backend, registry) = setup();
        let created = gauge("created");

        registry
            .record_or_register(&created, "OrderFlow", 1)
            .expect("record");
        registry
            .record_or_register(&created, "PaymentFlow", 1)
            .expect("record");
        registry
            .record_or_register(&created, "OrderFlow", 2)
            .expect("record");

        assert_eq!(backend.registrations(), vec!["created".to_string()]);
        assert_eq!(
            backend.export("created"),
            vec![
                GaugeReading::new("OrderFlow", 2),
                GaugeReading::new("PaymentFlow", 1),
            ]
        );
    }

    #[test]
    fn registration_count_matches_distinct_names() {
        let (backend, registry) = setup();
        let names = ["a", "b", "c", "d"];
        for round in 0..5 {
            for name in names {
                registry
                    .record_or_register(&gauge(name), &format!("e{}", round % 3), round)
                    .expect("record");
            }
        }

        let mut registrations = backend.registrations();
        registrations.sort();
        assert_eq!(registrations, names.map(String::from).to_vec());
        assert_eq!(registry.len(), names.len() * 3);
    }

    #[test]
    fn callback_sees_latest_value_without_cross_entity_leakage() {
        let (backend, registry) = setup();
        let queued = gauge("queued");
        let aborted = gauge("aborted");

        registry.record_or_register(&queued, "a", 10).expect("record");
        registry.record_or_register(&aborted, "a", 99).expect("record");
        registry.record_or_register(&queued, "b", 20).expect("record");
        assert_eq!(
            backend.export("queued"),
            vec![GaugeReading::new("a", 10), GaugeReading::new("b", 20)]
        );

        registry.record_or_register(&queued, "a", 11).expect("record");
        assert_eq!(
            backend.export("queued"),
            vec![GaugeReading::new("a", 11), GaugeReading::new("b", 20)]
        );
        assert_eq!(backend.export("aborted"), vec![GaugeReading::new("a", 99)]);
    }

    #[test]
    fn replay_is_idempotent() {
        let (backend, registry) = setup();
        let completed = gauge("completed");

        registry.record_or_register(&completed, "a", 5).expect("record");
        registry.record_or_register(&completed, "a", 5).expect("record");

        assert_eq!(backend.registrations().len(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.export("completed"), vec![GaugeReading::new("a", 5)]);
    }

    #[test]
    fn metric_name_prefixes_do_not_collide() {
        let (backend, registry) = setup();
        registry.record_or_register(&gauge("elapsed"), "a", 1).expect("record");
        registry.record_or_register(&gauge("elapsed_max"), "a", 2).expect("record");
        registry.record_or_register(&gauge("elapse"), "a", 3).expect("record");

        assert_eq!(backend.export("elapsed"), vec![GaugeReading::new("a", 1)]);
        assert_eq!(backend.export("elapsed_max"), vec![GaugeReading::new("a", 2)]);
        assert_eq!(backend.export("elapse"), vec![GaugeReading::new("a", 3)]);
    }

    #[test]
    fn rejected_registration_is_surfaced_once_and_isolated() {
        let backend = Arc::new(RecordingBackend::rejecting("bad"));
        let registry = GaugeRegistry::new(backend.clone());

        let err = registry
            .record_or_register(&gauge("bad"), "a", 1)
            .expect_err("rejected");
        assert_eq!(err.metric, "bad");

        // Never retried, and the value is still cached
        registry.record_or_register(&gauge("bad"), "a", 2).expect("no retry");
        assert_eq!(backend.registrations(), vec!["bad".to_string()]);
        assert!(registry.is_registered("bad"));
        assert_eq!(registry.readings("bad"), vec![GaugeReading::new("a", 2)]);

        registry.record_or_register(&gauge("good"), "a", 3).expect("record");
        assert_eq!(backend.export("good"), vec![GaugeReading::new("a", 3)]);
    }

    #[test]
    fn expiry_hides_and_evicts_stale_series() {
        let backend = Arc::new(RecordingBackend::default());
        let expiry = ExpiryPolicy::After(Duration::from_millis(50));
        let registry = GaugeRegistry::with_expiry(backend.clone(), expiry);
        let created = gauge("created");

        registry.record_or_register(&created, "gone", 1).expect("record");
        thread::sleep(Duration::from_millis(100));
        registry.record_or_register(&created, "alive", 2).expect("record");

        assert_eq!(backend.export("created"), vec![GaugeReading::new("alive", 2)]);
        assert_eq!(registry.evict_expired(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_registered("created"));
    }

    #[test]
    fn never_expires_by_default() {
        let (backend, registry) = setup();
        registry.record_or_register(&gauge("created"), "a", 1).expect("record");
        assert_eq!(registry.evict_expired(), 0);
        assert_eq!(backend.export("created"), vec![GaugeReading::new("a", 1)]);
    }

    #[test]
    fn concurrent_exports_during_writes() {
        let (backend, registry) = setup();
        let registry = Arc::new(registry);
        let names: Vec<String> = (0..8).map(|i| format!("m{}", i)).collect();

        let writer = {
            let registry = registry.clone();
            let names = names.clone();
            thread::spawn(move || {
                for value in 0..200 {
                    for name in &names {
                        for entity in ["a", "b", "c"] {
                            registry
                                .record_or_register(&gauge(name), entity, value)
                                .expect("record");
                        }
                    }
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let backend = backend.clone();
                let names = names.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        for name in &names {
                            let readings = backend.export(name);
                            assert!(readings.len() <= 3);
                            assert!(readings.iter().all(|r| (0..200).contains(&r.value)));
                        }
                    }
                })
            })
            .collect();

        writer.join().expect("writer");
        readers.into_iter().for_each(|r| r.join().expect("reader"));

        assert_eq!(backend.registrations().len(), names.len());
        for name in &names {
            assert_eq!(
                backend.export(name),
                vec![
                    GaugeReading::new("a", 199),
                    GaugeReading::new("b", 199),
                    GaugeReading::new("c", 199),
                ]
            );
        }
    }

    #[test]
    fn concurrent_first_sight_registers_once() {
        let (backend, registry) = setup();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    registry
                        .record_or_register(&gauge("shared"), &format!("e{}", i), i)
                        .expect("record");
                })
            })
            .collect();
        handles.into_iter().for_each(|h| h.join().expect("join"));

        assert_eq!(backend.registrations(), vec!["shared".to_string()]);
        assert_eq!(backend.export("shared").len(), 8);
    }
}
