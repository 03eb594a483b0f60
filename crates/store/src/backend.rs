//! Tuple store trait definition.
//!
//! This module defines the [`TupleStore`] trait, the capability every adapter
//! in this workspace is built on. It models a remote, space-addressed store
//! whose rows are flat tuples with a fixed-width primary key.
//!
//! # Design Philosophy
//!
//! The trait exposes exactly the atomic primitives the adapters rely on, and
//! nothing that would need a multi-statement transaction:
//!
//! - **Single-key atomics**: `insert` (fails on an existing key), `replace`,
//!   `update` with field arithmetic, `delete` returning the removed row
//! - **Server-side procedures**: [`call`](TupleStore::call) runs a named
//!   script atomically on the store, for protocols that need more than one
//!   step to be indivisible
//! - **Async by default**: every operation is one network round trip
//!
//! Expiry is *not* interpreted by the store's read path. Rows whose
//! `expire_at` has passed are still returned; adapters decide what "expired"
//! means for them.

use async_trait::async_trait;

use crate::{
    error::StorageResult,
    types::{Field, SpaceId, Tuple, UpdateOp},
};

/// Abstract client for a space-addressed tuple store.
///
/// Implementations must be thread-safe (`Send + Sync`): a single handle is
/// shared by every adapter and every concurrent caller.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`insert`](TupleStore::insert) | Insert, failing with `Conflict` if the key exists |
/// | [`replace`](TupleStore::replace) | Unconditional upsert |
/// | [`get`](TupleStore::get) | Fetch one row by full primary key |
/// | [`select`](TupleStore::select) | Fetch every row matching a key prefix |
/// | [`update`](TupleStore::update) | Apply field operations atomically |
/// | [`delete`](TupleStore::delete) | Remove a row, returning it |
/// | [`call`](TupleStore::call) | Run a server-side procedure |
/// | [`truncate`](TupleStore::truncate) | Remove every row of a space |
///
/// # Example
///
/// ```
/// use tuplekit_store::{Field, MemoryTupleStore, SpaceDef, SpaceId, Tuple, TupleStore};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = MemoryTupleStore::new();
/// let space = SpaceId::from(1);
/// store.create_space(SpaceDef::new(space, 1).unwrap()).unwrap();
///
/// store.insert(space, Tuple::from(vec![Field::from("hits"), Field::Int(1)])).await.unwrap();
/// let hits = store.increment(space, &[Field::from("hits")], 1, 41).await.unwrap();
/// assert_eq!(hits, Some(42));
/// # });
/// ```
#[async_trait]
pub trait TupleStore: Send + Sync {
    /// Inserts a tuple whose primary key must not exist yet.
    ///
    /// This is the insert-if-absent primitive. Of several callers racing to
    /// insert the same key, exactly one succeeds.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict): a row with this key exists,
    ///   regardless of its `expire_at`.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn insert(&self, space: SpaceId, tuple: Tuple) -> StorageResult<()>;

    /// Inserts or overwrites a tuple.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn replace(&self, space: SpaceId, tuple: Tuple) -> StorageResult<()>;

    /// Fetches a row by its full primary key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(tuple))` if the row exists (expired or not)
    /// - `Ok(None)` if it doesn't
    #[must_use = "store operations may fail and errors must be handled"]
    async fn get(&self, space: SpaceId, key: &[Field]) -> StorageResult<Option<Tuple>>;

    /// Fetches several rows by full primary key, preserving input order.
    ///
    /// The default implementation issues one [`get`](TupleStore::get) per key.
    /// Stores with a multi-key select should override it to use a single
    /// round trip.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn get_many(
        &self,
        space: SpaceId,
        keys: &[Vec<Field>],
    ) -> StorageResult<Vec<Option<Tuple>>> {
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            rows.push(self.get(space, key).await?);
        }
        Ok(rows)
    }

    /// Fetches every row whose primary key starts with `key_prefix`, in key
    /// order. An empty prefix selects the whole space.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn select(&self, space: SpaceId, key_prefix: &[Field]) -> StorageResult<Vec<Tuple>>;

    /// Applies `ops` to the row with primary key `key` as one atomic step.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(tuple))` with the row after the update
    /// - `Ok(None)` if no such row exists (nothing is created)
    ///
    /// # Errors
    ///
    /// - [`StorageError::FieldType`](crate::StorageError::FieldType): an `Add` targeted a
    ///   non-integer field, or overflowed.
    /// - [`StorageError::InvalidTuple`](crate::StorageError::InvalidTuple): an op touched a key
    ///   field or a field past the end of the row.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn update(
        &self,
        space: SpaceId,
        key: &[Field],
        ops: &[UpdateOp],
    ) -> StorageResult<Option<Tuple>>;

    /// Atomically adds `delta` to integer field `field` and returns the new
    /// value, or `None` when the row is absent.
    ///
    /// Convenience wrapper over [`update`](TupleStore::update).
    #[must_use = "store operations may fail and errors must be handled"]
    async fn increment(
        &self,
        space: SpaceId,
        key: &[Field],
        field: usize,
        delta: i64,
    ) -> StorageResult<Option<i64>> {
        let updated = self.update(space, key, &[UpdateOp::Add { field, delta }]).await?;
        Ok(updated.and_then(|tuple| tuple.int(field)))
    }

    /// Deletes a row and returns what was removed.
    ///
    /// Deleting a missing key is not an error and returns `Ok(None)`. Because
    /// the removed row is returned by the same atomic step, this doubles as a
    /// read-and-reset primitive.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn delete(&self, space: SpaceId, key: &[Field]) -> StorageResult<Option<Tuple>>;

    /// Upserts several tuples.
    ///
    /// Each tuple succeeds or fails on its own; there is no rollback. The
    /// returned vector holds one result per input tuple, in order.
    async fn replace_many(&self, space: SpaceId, tuples: Vec<Tuple>) -> Vec<StorageResult<()>> {
        let mut results = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            results.push(self.replace(space, tuple).await);
        }
        results
    }

    /// Deletes several rows. Same independence rules as
    /// [`replace_many`](TupleStore::replace_many).
    async fn delete_many(&self, space: SpaceId, keys: &[Vec<Field>]) -> Vec<StorageResult<()>> {
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            results.push(self.delete(space, key).await.map(|_| ()));
        }
        results
    }

    /// Runs a server-side procedure atomically and returns its result rows.
    ///
    /// Procedures must be installed on the store ahead of time. See
    /// [`procedures`](crate::procedures) for the ones this workspace expects.
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnknownProcedure`](crate::StorageError::UnknownProcedure): nothing is
    ///   registered under `procedure`.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn call(&self, procedure: &str, args: Vec<Field>) -> StorageResult<Vec<Tuple>>;

    /// Removes every row of a space.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn truncate(&self, space: SpaceId) -> StorageResult<()>;

    /// Number of rows physically present in a space, expired ones included.
    #[must_use = "store operations may fail and errors must be handled"]
    async fn len(&self, space: SpaceId) -> StorageResult<usize>;
}
