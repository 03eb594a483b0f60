//! Test doubles for the buffer seams and a fully provisioned store.
//!
//! Feature-gated behind `testutil`. Enable it in `[dev-dependencies]`:
//!
//! ```toml
//! [dev-dependencies]
//! tuplekit-cache = { workspace = true, features = ["testutil"] }
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tuplekit_store::{MemoryTupleStore, TupleStore, testutil::store_with_spaces};

use crate::{
    buffer::{BufferConsumer, CoalescingBuffer, Delivery, DeliveryRequest, DeliveryScheduler},
    cache::TupleCache,
    config::{BufferConfig, CacheConfig, ResultBackendConfig},
    error::{CacheError, CacheResult},
    results::ResultBackend,
};

/// A [`MemoryTupleStore`] with the cache, result and buffer spaces of the
/// default configurations defined.
///
/// # Panics
///
/// Panics if the default layout is invalid.
#[must_use]
pub fn default_store() -> MemoryTupleStore {
    let [counters, extras] =
        CoalescingBuffer::<MemoryTupleStore>::space_defs(&BufferConfig::default())
            .expect("default buffer layout is valid");
    store_with_spaces(&[
        TupleCache::<MemoryTupleStore>::space_def(&CacheConfig::default())
            .expect("default cache layout is valid"),
        ResultBackend::<MemoryTupleStore>::space_def(&ResultBackendConfig::default())
            .expect("default result layout is valid"),
        counters,
        extras,
    ])
}

/// Scheduler that records every request instead of running it.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    requests: Mutex<Vec<(DeliveryRequest, Duration)>>,
}

impl RecordingScheduler {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request scheduled so far, with its delay.
    #[must_use]
    pub fn requests(&self) -> Vec<(DeliveryRequest, Duration)> {
        self.requests.lock().clone()
    }

    /// Removes and returns the recorded requests.
    pub fn take(&self) -> Vec<(DeliveryRequest, Duration)> {
        std::mem::take(&mut *self.requests.lock())
    }
}

#[async_trait]
impl DeliveryScheduler for RecordingScheduler {
    async fn schedule(&self, request: DeliveryRequest, delay: Duration) -> CacheResult<()> {
        self.requests.lock().push((request, delay));
        Ok(())
    }
}

/// Consumer that records deliveries, optionally failing the next one.
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    deliveries: Mutex<Vec<Delivery>>,
    fail_next: AtomicBool,
}

impl RecordingConsumer {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful deliveries so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.deliveries.lock().len()
    }

    /// Every successful delivery so far, in arrival order.
    #[must_use]
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Makes the next [`apply`](BufferConsumer::apply) fail without recording.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Sum of `column` across every delivery.
    #[must_use]
    pub fn total(&self, column: &str) -> i64 {
        self.deliveries.lock().iter().filter_map(|d| d.columns.get(column)).sum()
    }
}

#[async_trait]
impl BufferConsumer for RecordingConsumer {
    async fn apply(&self, delivery: Delivery) -> CacheResult<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(CacheError::delivery("consumer rejected delivery"));
        }
        self.deliveries.lock().push(delivery);
        Ok(())
    }
}

/// A buffer over `store` wired to fresh recorders, using `config`.
#[must_use]
pub fn recording_buffer<S: TupleStore + 'static>(
    store: Arc<S>,
    config: BufferConfig,
) -> (CoalescingBuffer<S>, Arc<RecordingScheduler>, Arc<RecordingConsumer>) {
    let scheduler = Arc::new(RecordingScheduler::new());
    let consumer = Arc::new(RecordingConsumer::new());
    let buffer = CoalescingBuffer::builder()
        .store(store)
        .scheduler(Arc::clone(&scheduler) as Arc<dyn DeliveryScheduler>)
        .consumer(Arc::clone(&consumer) as Arc<dyn BufferConsumer>)
        .config(config)
        .build();
    (buffer, scheduler, consumer)
}
