//! Concurrency-safe runtime metrics.
//!
//! [`MetricsCollector`] keeps counters, gauges, histograms, and timers keyed
//! by metric name plus a canonicalized (sorted) label set. It is built for
//! high-contention update paths:
//!
//! - counter increments and gauge stores are single atomic operations once a
//!   series exists (the read-locked fast path);
//! - a series is created at most once, under a short write lock;
//! - histogram observations touch one atomic bucket slot plus an atomic
//!   bit-cast sum.
//!
//! Metric operations never return errors. A misdeclared bucket set is
//! logged once per metric name and ignored. Snapshots are point-in-time and
//! independent of later mutation.
//!
//! A process-wide default collector is available via
//! [`MetricsCollector::global`] for embedders that do not inject their own;
//! executors and managers always take an injected collector first.
//!
//! # Example
//!
//! ```rust
//! use agentrt::metrics::MetricsCollector;
//!
//! let metrics = MetricsCollector::new();
//! metrics.inc_counter("requests_total", &[("agent", "support-bot")]);
//! metrics.set_gauge("sessions_live", &[], 42.0);
//! metrics.observe("request_seconds", &[], 0.035);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.counters.len(), 1);
//! assert_eq!(snapshot.counters[0].value, 1);
//! ```

use lazy_static::lazy_static;
use log::warn;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use crate::agentrt::config::MetricsConfig;

/// Identity of one metric series: name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    /// Canonicalize by sorting label pairs by key (then value), so that two
    /// label sets with the same pairs map to the same series regardless of
    /// argument order.
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }
}

/// One histogram series: per-bucket atomic bins plus sum and count.
struct Histogram {
    /// Ascending upper bucket boundaries. Observations above the last
    /// boundary land in the overflow bin.
    boundaries: Vec<f64>,
    /// One bin per boundary plus a trailing overflow bin.
    bins: Vec<AtomicU64>,
    /// Sum of all observed values, stored as `f64` bits.
    sum_bits: AtomicU64,
    /// Total number of observations.
    count: AtomicU64,
}

impl Histogram {
    fn new(boundaries: Vec<f64>) -> Self {
        let bins = (0..=boundaries.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            boundaries,
            bins,
            sum_bits: AtomicU64::new(0f64.to_bits()),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        let idx = self.boundaries.partition_point(|b| value > *b);
        self.bins[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        // CAS loop keeps the f64 sum exact without a lock.
        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let updated = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                updated,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

/// Snapshot of one counter series.
#[derive(Debug, Clone, PartialEq)]
pub struct CounterPoint {
    /// Metric name.
    pub name: String,
    /// Sorted label pairs.
    pub labels: Vec<(String, String)>,
    /// Current value.
    pub value: u64,
}

/// Snapshot of one gauge series.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugePoint {
    /// Metric name.
    pub name: String,
    /// Sorted label pairs.
    pub labels: Vec<(String, String)>,
    /// Current value.
    pub value: f64,
}

/// Snapshot of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramPoint {
    /// Metric name.
    pub name: String,
    /// Sorted label pairs.
    pub labels: Vec<(String, String)>,
    /// `(upper_boundary, cumulative_count)` pairs in boundary order; the
    /// final pair uses `f64::INFINITY` and equals `count`.
    pub buckets: Vec<(f64, u64)>,
    /// Sum of all observations.
    pub sum: f64,
    /// Total number of observations.
    pub count: u64,
}

/// Point-in-time registry snapshot, sorted by series key for determinism.
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    /// All counter series.
    pub counters: Vec<CounterPoint>,
    /// All gauge series.
    pub gauges: Vec<GaugePoint>,
    /// All histogram series.
    pub histograms: Vec<HistogramPoint>,
}

struct Inner {
    counters: RwLock<HashMap<SeriesKey, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<SeriesKey, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<SeriesKey, Arc<Histogram>>>,
    /// Bucket sets declared ahead of first observation, by metric name.
    declared_buckets: RwLock<HashMap<String, Vec<f64>>>,
    /// Metric names whose bucket declaration was rejected (warned once).
    warned: Mutex<HashSet<String>>,
    default_buckets: Vec<f64>,
}

/// Concurrency-safe counters, gauges, histograms, and timers with labels.
///
/// Cheap to clone — clones share the same registry. See the module docs for
/// the concurrency model.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<Inner>,
}

lazy_static! {
    static ref GLOBAL_COLLECTOR: MetricsCollector = MetricsCollector::new();
}

impl MetricsCollector {
    /// Create a collector with the default histogram bucket ladder.
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    /// Create a collector with explicit settings.
    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                counters: RwLock::new(HashMap::new()),
                gauges: RwLock::new(HashMap::new()),
                histograms: RwLock::new(HashMap::new()),
                declared_buckets: RwLock::new(HashMap::new()),
                warned: Mutex::new(HashSet::new()),
                default_buckets: config.default_histogram_buckets,
            }),
        }
    }

    /// The process-wide default collector.
    ///
    /// Prefer injecting a collector; use the global only at composition
    /// roots that have nothing to inject. The global lives for the process
    /// lifetime and needs no shutdown.
    pub fn global() -> MetricsCollector {
        GLOBAL_COLLECTOR.clone()
    }

    // ── Counters ─────────────────────────────────────────────────────────

    /// Increment a counter series by 1.
    pub fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        self.add_counter(name, labels, 1);
    }

    /// Increment a counter series by `delta`. Counters only move up; the
    /// unsigned delta makes decrements unrepresentable.
    pub fn add_counter(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let key = SeriesKey::new(name, labels);
        if let Some(counter) = self.read_series(&self.inner.counters, &key) {
            counter.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        let counter = self.create_series(&self.inner.counters, key, || Arc::new(AtomicU64::new(0)));
        counter.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value of a counter series (0 if it does not exist).
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = SeriesKey::new(name, labels);
        self.read_series(&self.inner.counters, &key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // ── Gauges ───────────────────────────────────────────────────────────

    /// Set a gauge series to `value`.
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        if let Some(gauge) = self.read_series(&self.inner.gauges, &key) {
            gauge.store(value.to_bits(), Ordering::Relaxed);
            return;
        }
        let gauge = self.create_series(&self.inner.gauges, key, || {
            Arc::new(AtomicU64::new(0f64.to_bits()))
        });
        gauge.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Current value of a gauge series, if it exists.
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let key = SeriesKey::new(name, labels);
        self.read_series(&self.inner.gauges, &key)
            .map(|g| f64::from_bits(g.load(Ordering::Relaxed)))
    }

    // ── Histograms ───────────────────────────────────────────────────────

    /// Declare explicit bucket boundaries for a histogram name, ahead of its
    /// first observation.
    ///
    /// Boundaries must be non-empty, finite, and strictly ascending; a bad
    /// declaration is logged once and ignored (the default ladder applies).
    /// Series that already exist keep their buckets.
    pub fn declare_buckets(&self, name: &str, boundaries: &[f64]) {
        let valid = !boundaries.is_empty()
            && boundaries.iter().all(|b| b.is_finite())
            && boundaries.windows(2).all(|w| w[0] < w[1]);
        if !valid {
            let mut warned = match self.inner.warned.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if warned.insert(name.to_string()) {
                warn!("ignoring invalid bucket declaration for metric '{}'", name);
            }
            return;
        }
        let mut declared = match self.inner.declared_buckets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        declared.insert(name.to_string(), boundaries.to_vec());
    }

    /// Record one observation into a histogram series.
    pub fn observe(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        if let Some(histogram) = self.read_series(&self.inner.histograms, &key) {
            histogram.observe(value);
            return;
        }
        let boundaries = {
            let declared = match self.inner.declared_buckets.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            declared
                .get(name)
                .cloned()
                .unwrap_or_else(|| self.inner.default_buckets.clone())
        };
        let histogram = self.create_series(&self.inner.histograms, key, || {
            Arc::new(Histogram::new(boundaries.clone()))
        });
        histogram.observe(value);
    }

    /// Total observation count of a histogram series (0 if absent).
    pub fn histogram_count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = SeriesKey::new(name, labels);
        self.read_series(&self.inner.histograms, &key)
            .map(|h| h.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    // ── Timers ───────────────────────────────────────────────────────────

    /// Start a timer that records elapsed seconds into the named histogram
    /// when stopped (or dropped).
    pub fn start_timer(&self, name: &str, labels: &[(&str, &str)]) -> MetricTimer {
        MetricTimer {
            collector: self.clone(),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            start: Instant::now(),
            recorded: false,
        }
    }

    // ── Snapshot ─────────────────────────────────────────────────────────

    /// A point-in-time snapshot of every series, sorted for determinism.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();

        {
            let counters = match self.inner.counters.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (key, counter) in counters.iter() {
                snapshot.counters.push(CounterPoint {
                    name: key.name.clone(),
                    labels: key.labels.clone(),
                    value: counter.load(Ordering::Relaxed),
                });
            }
        }
        {
            let gauges = match self.inner.gauges.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (key, gauge) in gauges.iter() {
                snapshot.gauges.push(GaugePoint {
                    name: key.name.clone(),
                    labels: key.labels.clone(),
                    value: f64::from_bits(gauge.load(Ordering::Relaxed)),
                });
            }
        }
        {
            let histograms = match self.inner.histograms.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (key, histogram) in histograms.iter() {
                let mut cumulative = 0u64;
                let mut buckets = Vec::with_capacity(histogram.bins.len());
                for (i, bin) in histogram.bins.iter().enumerate() {
                    cumulative += bin.load(Ordering::Relaxed);
                    let boundary = histogram
                        .boundaries
                        .get(i)
                        .copied()
                        .unwrap_or(f64::INFINITY);
                    buckets.push((boundary, cumulative));
                }
                snapshot.histograms.push(HistogramPoint {
                    name: key.name.clone(),
                    labels: key.labels.clone(),
                    buckets,
                    sum: f64::from_bits(histogram.sum_bits.load(Ordering::Relaxed)),
                    count: histogram.count.load(Ordering::Relaxed),
                });
            }
        }

        snapshot.counters.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        snapshot.gauges.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        snapshot
            .histograms
            .sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        snapshot
    }

    // ── Series plumbing ──────────────────────────────────────────────────

    /// Fast path: fetch an existing series under the read lock.
    fn read_series<T: Clone>(&self, map: &RwLock<HashMap<SeriesKey, T>>, key: &SeriesKey) -> Option<T> {
        let guard = match map.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.get(key).cloned()
    }

    /// Slow path: create the series under the write lock, racing peers
    /// gracefully (first writer wins, everyone uses the same series).
    fn create_series<T: Clone>(
        &self,
        map: &RwLock<HashMap<SeriesKey, T>>,
        key: SeriesKey,
        make: impl FnOnce() -> T,
    ) -> T {
        let mut guard = match map.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.entry(key).or_insert_with(make).clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`MetricsCollector::start_timer`].
///
/// Records elapsed wall-clock seconds into the matching histogram exactly
/// once: on [`stop`](MetricTimer::stop), or on drop if never stopped.
pub struct MetricTimer {
    collector: MetricsCollector,
    name: String,
    labels: Vec<(String, String)>,
    start: Instant,
    recorded: bool,
}

impl MetricTimer {
    /// Record the elapsed time now and return it in seconds.
    pub fn stop(mut self) -> f64 {
        let elapsed = self.record();
        self.recorded = true;
        elapsed
    }

    fn record(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        let labels: Vec<(&str, &str)> = self
            .labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.collector.observe(&self.name, &labels, elapsed);
        elapsed
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        if !self.recorded {
            self.record();
            self.recorded = true;
        }
    }
}
