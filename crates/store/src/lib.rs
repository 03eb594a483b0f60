//! Tuple store abstraction shared by the tuplekit adapters.
//!
//! This crate provides the [`TupleStore`] trait and the types that go with it.
//! A tuple store is a remote, space-addressed database: each space is a table
//! of flat tuples whose first few fields form the primary key. The cache,
//! result backend, and write-coalescing buffer in `tuplekit-cache` are all
//! written against this trait and nothing else.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │     (web handlers, background workers, model counters)      │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      tuplekit-cache                         │
//! │    TupleCache │ ResultBackend │ CoalescingBuffer            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      tuplekit-store                         │
//! │                    TupleStore trait                         │
//! │   (insert, replace, get, select, update, delete, call)      │
//! ├──────────────────┬──────────────────────────────────────────┤
//! │ MemoryTupleStore │      network clients (out of tree)       │
//! └──────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use tuplekit_store::{Field, MemoryTupleStore, SpaceDef, SpaceId, Tuple, TupleStore, UpdateOp};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemoryTupleStore::new();
//!     let counters = SpaceId::from(2);
//!     store.create_space(SpaceDef::new(counters, 1)?)?;
//!
//!     // Insert-if-absent, then atomic arithmetic
//!     store.insert(counters, Tuple::from(vec![Field::from("hits"), Field::Int(1)])).await?;
//!     store.update(counters, &[Field::from("hits")], &[UpdateOp::Add { field: 1, delta: 2 }]).await?;
//!
//!     // Read-and-reset in one step
//!     let drained = store.delete(counters, &[Field::from("hits")]).await?;
//!     assert_eq!(drained.and_then(|row| row.int(1)), Some(3));
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Store Client
//!
//! 1. Implement the [`TupleStore`] trait
//! 2. Install the procedures listed in [`procedures`] on the server
//! 3. Map client-specific errors to [`StorageError`]
//!
//! See the [`memory`] module source for a reference implementation.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a failure-injecting store wrapper and
//!   assertion macros. Enable this in `[dev-dependencies]` for integration tests.
//! - **`failpoints`**: Compiles in `fail` crate fail points (`memory-store-call`).

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod expiry;
pub mod memory;
pub mod procedures;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::TupleStore;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::{DEFAULT_SWEEP_INTERVAL, MemoryTupleStore, SpaceData, Spaces};
pub use procedures::Procedure;
pub use types::{Field, SpaceDef, SpaceId, Tuple, UpdateOp};
