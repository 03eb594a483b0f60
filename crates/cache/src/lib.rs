//! Cache, task-result store and write-coalescing counter buffer over a
//! [`TupleStore`](tuplekit_store::TupleStore).
//!
//! Three adapters share one value codec and one key scheme:
//!
//! - [`TupleCache`]: expiring key-value cache with atomic `incr`/`decr`,
//!   insert-if-absent `add`, and batch operations
//! - [`ResultBackend`]: task results with a fixed TTL and an explicit
//!   [`TaskResult::Pending`] state
//! - [`CoalescingBuffer`]: merges high-frequency counter increments in the
//!   store and hands each accumulation window to a [`BufferConsumer`] once
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┬────────────────┬──────────────────────────────────┐
//! │  TupleCache  │ ResultBackend  │ CoalescingBuffer ─► Scheduler    │
//! │              │                │                  ─► Consumer     │
//! ├──────────────┴────────────────┴──────────────────────────────────┤
//! │        codec (int fast-path / sentinel blob)  ·  keys            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                      Arc<impl TupleStore>                        │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All coordination relies on the store's single-step atomics (insert,
//! add, delete-returning-old, procedures); adapters hold no locks of their
//! own and are safe to share across tasks.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Recording scheduler/consumer and a pre-provisioned
//!   in-memory store for integration tests.
//! - **`failpoints`**: Compiles in the `buffer-drain-extra` fail point.

#![deny(unsafe_code)]

pub mod buffer;
pub mod cache;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod error;
pub mod keys;
pub mod metrics;
pub mod results;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;

// Re-export primary types at crate root for convenience
pub use buffer::{
    BufferConsumer, CoalescingBuffer, Columns, Delivery, DeliveryRequest, DeliveryScheduler, Extra,
    ProcessOutcome,
};
pub use cache::{Timeout, TupleCache};
pub use codec::{BLOB_SENTINEL, CacheValue, EncodedValue};
pub use config::{BufferConfig, CacheConfig, ResultBackendConfig};
pub use delivery::{DeliveryQueue, DeliveryWorker};
pub use error::{CacheError, CacheResult};
pub use keys::{EntityRef, FilterValue, Filters, ModelLabel};
pub use metrics::{Metrics, MetricsCollector, MetricsSnapshot};
pub use results::{ResultBackend, TaskResult};
pub use tuplekit_store::ConfigError;
