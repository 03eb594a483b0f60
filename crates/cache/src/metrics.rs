//! Adapter metrics.
//!
//! Lock-free counters for cache traffic, result backend traffic, and the
//! coalescing buffer's window lifecycle. A [`Metrics`] handle is cheap to
//! clone; several adapters may share one to report a combined view.
//!
//! All atomics use `Ordering::Relaxed`. Each counter is independent, so a
//! snapshot may observe two counters at slightly different instants, which is
//! fine for periodic telemetry.
//!
//! # Usage
//!
//! ```
//! use tuplekit_cache::metrics::Metrics;
//!
//! let metrics = Metrics::new();
//! metrics.record_cache_hit();
//! metrics.record_cache_miss();
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.cache_hit_rate(), 0.5);
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use tracing::warn;

/// Error rate above which [`Metrics::log_metrics`] emits a warning.
const HIGH_ERROR_RATE: f64 = 0.05;

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, bon::Builder)]
pub struct MetricsSnapshot {
    /// Cache reads that found a live row.
    #[builder(default)]
    pub cache_hits: u64,
    /// Cache reads that found nothing or an expired row.
    #[builder(default)]
    pub cache_misses: u64,
    /// Cache writes (`set`, `add` winners, `touch`).
    #[builder(default)]
    pub cache_sets: u64,
    /// Cache deletions.
    #[builder(default)]
    pub cache_deletes: u64,
    /// Successful `incr`/`decr` calls.
    #[builder(default)]
    pub cache_incrs: u64,
    /// `add` calls that lost to a live row.
    #[builder(default)]
    pub add_conflicts: u64,
    /// Task results stored.
    #[builder(default)]
    pub result_sets: u64,
    /// Task result lookups.
    #[builder(default)]
    pub result_gets: u64,
    /// Buffer `incr` calls.
    #[builder(default)]
    pub buffer_increments: u64,
    /// Accumulation windows opened (deliveries scheduled).
    #[builder(default)]
    pub windows_opened: u64,
    /// Windows handed to the consumer.
    #[builder(default)]
    pub deliveries: u64,
    /// Drains that found only zero deltas.
    #[builder(default)]
    pub deliveries_skipped: u64,
    /// Operations that returned an error.
    #[builder(default)]
    pub error_count: u64,
}

impl MetricsSnapshot {
    /// Hits over hits plus misses, or 0 with no reads.
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let reads = self.cache_hits + self.cache_misses;
        if reads == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / reads as f64
    }

    /// Every counted operation.
    #[must_use]
    pub fn total_operations(&self) -> u64 {
        self.cache_hits
            + self.cache_misses
            + self.cache_sets
            + self.cache_deletes
            + self.cache_incrs
            + self.add_conflicts
            + self.result_sets
            + self.result_gets
            + self.buffer_increments
            + self.deliveries
            + self.deliveries_skipped
    }

    /// Errors over total operations, or 0 with no operations.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        let total = self.total_operations();
        if total == 0 {
            return 0.0;
        }
        self.error_count as f64 / total as f64
    }

    /// Average number of increments folded into one delivery.
    #[must_use]
    pub fn coalescing_ratio(&self) -> f64 {
        if self.deliveries == 0 {
            return 0.0;
        }
        self.buffer_increments as f64 / self.deliveries as f64
    }
}

/// Shared counter set for the adapters.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_sets: AtomicU64,
    cache_deletes: AtomicU64,
    cache_incrs: AtomicU64,
    add_conflicts: AtomicU64,
    result_sets: AtomicU64,
    result_gets: AtomicU64,
    buffer_increments: AtomicU64,
    windows_opened: AtomicU64,
    deliveries: AtomicU64,
    deliveries_skipped: AtomicU64,
    error_count: AtomicU64,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Metrics").field(&self.snapshot()).finish()
    }
}

macro_rules! recorder {
    ($($(#[$doc:meta])* $method:ident => $field:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $method(&self) {
                self.inner.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl Metrics {
    /// Creates a collector with every counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    recorder! {
        /// Records a cache hit.
        record_cache_hit => cache_hits;
        /// Records a cache miss.
        record_cache_miss => cache_misses;
        /// Records a cache write.
        record_cache_set => cache_sets;
        /// Records a cache deletion.
        record_cache_delete => cache_deletes;
        /// Records a successful counter update.
        record_cache_incr => cache_incrs;
        /// Records an `add` that found a live row.
        record_add_conflict => add_conflicts;
        /// Records a stored task result.
        record_result_set => result_sets;
        /// Records a task result lookup.
        record_result_get => result_gets;
        /// Records a buffer increment.
        record_buffer_increment => buffer_increments;
        /// Records a newly opened accumulation window.
        record_window_opened => windows_opened;
        /// Records a delivery handed to the consumer.
        record_delivery => deliveries;
        /// Records a drain that had nothing to deliver.
        record_delivery_skipped => deliveries_skipped;
        /// Records a failed operation.
        record_error => error_count;
    }

    /// Records `count` cache reads split into hits and misses.
    pub fn record_cache_reads(&self, hits: u64, misses: u64) {
        self.inner.cache_hits.fetch_add(hits, Ordering::Relaxed);
        self.inner.cache_misses.fetch_add(misses, Ordering::Relaxed);
    }

    /// Copies every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let inner = &*self.inner;
        MetricsSnapshot {
            cache_hits: load(&inner.cache_hits),
            cache_misses: load(&inner.cache_misses),
            cache_sets: load(&inner.cache_sets),
            cache_deletes: load(&inner.cache_deletes),
            cache_incrs: load(&inner.cache_incrs),
            add_conflicts: load(&inner.add_conflicts),
            result_sets: load(&inner.result_sets),
            result_gets: load(&inner.result_gets),
            buffer_increments: load(&inner.buffer_increments),
            windows_opened: load(&inner.windows_opened),
            deliveries: load(&inner.deliveries),
            deliveries_skipped: load(&inner.deliveries_skipped),
            error_count: load(&inner.error_count),
        }
    }

    /// Zeroes every counter. An increment racing with the reset may be lost.
    pub fn reset(&self) {
        let inner = &*self.inner;
        for counter in [
            &inner.cache_hits,
            &inner.cache_misses,
            &inner.cache_sets,
            &inner.cache_deletes,
            &inner.cache_incrs,
            &inner.add_conflicts,
            &inner.result_sets,
            &inner.result_gets,
            &inner.buffer_increments,
            &inner.windows_opened,
            &inner.deliveries,
            &inner.deliveries_skipped,
            &inner.error_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    /// Logs the current counters at INFO level, and warns on a high error rate.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();

        if snapshot.total_operations() == 0 {
            return;
        }

        tracing::info!(
            cache_hits = snapshot.cache_hits,
            cache_misses = snapshot.cache_misses,
            cache_hit_rate = snapshot.cache_hit_rate(),
            cache_sets = snapshot.cache_sets,
            cache_deletes = snapshot.cache_deletes,
            cache_incrs = snapshot.cache_incrs,
            add_conflicts = snapshot.add_conflicts,
            result_sets = snapshot.result_sets,
            result_gets = snapshot.result_gets,
            buffer_increments = snapshot.buffer_increments,
            windows_opened = snapshot.windows_opened,
            deliveries = snapshot.deliveries,
            deliveries_skipped = snapshot.deliveries_skipped,
            coalescing_ratio = snapshot.coalescing_ratio(),
            error_count = snapshot.error_count,
            "Adapter metrics snapshot"
        );

        if snapshot.error_rate() > HIGH_ERROR_RATE {
            warn!(
                error_rate = snapshot.error_rate(),
                error_count = snapshot.error_count,
                total_ops = snapshot.total_operations(),
                "High adapter error rate detected"
            );
        }
    }
}

/// Exposes the [`Metrics`] an adapter reports into.
pub trait MetricsCollector {
    /// Returns the adapter's metrics handle.
    fn metrics(&self) -> &Metrics;
}
