//! Shared test utilities for code built on [`TupleStore`].
//!
//! This module provides a failure-injecting store wrapper, a helper for
//! building stores with spaces already defined, and assertion macros for
//! [`StorageResult`] values. It is feature-gated behind `testutil` to keep it
//! out of production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! tuplekit-store = { workspace = true, features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use tuplekit_store::testutil::{FailingStore, store_with_spaces};
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    backend::TupleStore,
    error::{StorageError, StorageResult},
    memory::MemoryTupleStore,
    types::{Field, SpaceDef, SpaceId, Tuple, UpdateOp},
};

/// Create a [`MemoryTupleStore`] with every space in `defs` defined.
///
/// # Panics
///
/// Panics if two definitions clash.
#[must_use]
pub fn store_with_spaces(defs: &[SpaceDef]) -> MemoryTupleStore {
    let store = MemoryTupleStore::new();
    for def in defs {
        store.create_space(*def).expect("space definitions must not clash");
    }
    store
}

/// A [`TupleStore`] wrapper that can be switched into an "unreachable" mode.
///
/// While offline, every operation fails with [`StorageError::Connection`]
/// before touching the inner store, which models a dropped network link.
/// Operations are counted whether they fail or not.
#[derive(Clone)]
pub struct FailingStore {
    inner: MemoryTupleStore,
    offline: Arc<AtomicBool>,
    operations: Arc<AtomicUsize>,
}

impl FailingStore {
    /// Wraps `inner`, initially online.
    #[must_use]
    pub fn new(inner: MemoryTupleStore) -> Self {
        Self {
            inner,
            offline: Arc::new(AtomicBool::new(false)),
            operations: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Switches failure injection on or off. Shared by every clone.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of operations attempted so far.
    #[must_use]
    pub fn operations(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// The wrapped store, for inspecting state behind the failure layer.
    #[must_use]
    pub fn inner(&self) -> &MemoryTupleStore {
        &self.inner
    }

    fn check(&self) -> StorageResult<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::connection("store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl TupleStore for FailingStore {
    async fn insert(&self, space: SpaceId, tuple: Tuple) -> StorageResult<()> {
        self.check()?;
        self.inner.insert(space, tuple).await
    }

    async fn replace(&self, space: SpaceId, tuple: Tuple) -> StorageResult<()> {
        self.check()?;
        self.inner.replace(space, tuple).await
    }

    async fn get(&self, space: SpaceId, key: &[Field]) -> StorageResult<Option<Tuple>> {
        self.check()?;
        self.inner.get(space, key).await
    }

    async fn get_many(
        &self,
        space: SpaceId,
        keys: &[Vec<Field>],
    ) -> StorageResult<Vec<Option<Tuple>>> {
        self.check()?;
        self.inner.get_many(space, keys).await
    }

    async fn select(&self, space: SpaceId, key_prefix: &[Field]) -> StorageResult<Vec<Tuple>> {
        self.check()?;
        self.inner.select(space, key_prefix).await
    }

    async fn update(
        &self,
        space: SpaceId,
        key: &[Field],
        ops: &[UpdateOp],
    ) -> StorageResult<Option<Tuple>> {
        self.check()?;
        self.inner.update(space, key, ops).await
    }

    async fn delete(&self, space: SpaceId, key: &[Field]) -> StorageResult<Option<Tuple>> {
        self.check()?;
        self.inner.delete(space, key).await
    }

    async fn replace_many(&self, space: SpaceId, tuples: Vec<Tuple>) -> Vec<StorageResult<()>> {
        if self.check().is_err() {
            return tuples.iter().map(|_| Err(StorageError::connection("store offline"))).collect();
        }
        self.inner.replace_many(space, tuples).await
    }

    async fn delete_many(&self, space: SpaceId, keys: &[Vec<Field>]) -> Vec<StorageResult<()>> {
        if self.check().is_err() {
            return keys.iter().map(|_| Err(StorageError::connection("store offline"))).collect();
        }
        self.inner.delete_many(space, keys).await
    }

    async fn call(&self, procedure: &str, args: Vec<Field>) -> StorageResult<Vec<Tuple>> {
        self.check()?;
        self.inner.call(procedure, args).await
    }

    async fn truncate(&self, space: SpaceId) -> StorageResult<()> {
        self.check()?;
        self.inner.truncate(space).await
    }

    async fn len(&self, space: SpaceId) -> StorageResult<usize> {
        self.check()?;
        self.inner.len(space).await
    }
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tuplekit_store::{StorageError, StorageResult, assert_conflict};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            result,
        );
    }};
    ($result:expr, $msg:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err($crate::error::StorageError::Conflict)),
            "{}: expected StorageError::Conflict, got: {:?}",
            $msg,
            result,
        );
    }};
}

/// Assert that a result failed with a transient error (connection or
/// timeout).
///
/// Works for any error type with an `is_transient` method, so adapters whose
/// errors wrap [`StorageError`] can use it too. `$result` is evaluated once.
#[macro_export]
macro_rules! assert_transient {
    ($result:expr) => {{
        let result = &$result;
        assert!(
            matches!(result, Err(e) if e.is_transient()),
            "expected a transient error, got: {:?}",
            result,
        );
    }};
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use tuplekit_store::{StorageResult, assert_storage_ok};
///
/// let result: StorageResult<i32> = Ok(42);
/// let value = assert_storage_ok!(result);
/// assert_eq!(value, 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Whether a result is a [`StorageError::Conflict`].
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict))
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn def() -> SpaceDef {
        SpaceDef::new(SpaceId::from(1), 1).unwrap()
    }

    #[tokio::test]
    async fn test_store_with_spaces() {
        let store = store_with_spaces(&[def(), SpaceDef::new(SpaceId::from(2), 2).unwrap()]);
        assert_eq!(store.len(SpaceId::from(1)).await.unwrap(), 0);
        assert_eq!(store.len(SpaceId::from(2)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_store_toggles() {
        let store = FailingStore::new(store_with_spaces(&[def()]));
        let row = Tuple::from(vec![Field::from("k"), Field::Int(1)]);

        store.set_offline(true);
        let result = store.insert(SpaceId::from(1), row.clone()).await;
        assert_transient!(result);
        let batch = store.replace_many(SpaceId::from(1), vec![row.clone()]).await;
        assert!(batch[0].is_err());

        store.set_offline(false);
        assert_storage_ok!(store.insert(SpaceId::from(1), row.clone()).await);
        let duplicate = store.insert(SpaceId::from(1), row).await;
        assert_conflict!(duplicate);
        assert_eq!(store.operations(), 4);
        assert_eq!(store.inner().len(SpaceId::from(1)).await.unwrap(), 1);
    }

    #[test]
    fn test_is_conflict() {
        assert!(is_conflict::<()>(&Err(StorageError::Conflict)));
        assert!(!is_conflict::<()>(&Ok(())));
    }
}
