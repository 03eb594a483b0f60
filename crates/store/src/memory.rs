//! In-memory tuple store implementation.
//!
//! This module provides [`MemoryTupleStore`], an in-process implementation of
//! [`TupleStore`] suitable for tests, development, and single-process use.
//!
//! # Features
//!
//! - **Thread-safe**: every space lives behind one [`parking_lot::RwLock`], so
//!   each trait method (and each procedure) is a single atomic step
//! - **Ordered storage**: rows are kept in a [`BTreeMap`] keyed by primary key,
//!   which makes prefix selects a contiguous range scan
//! - **Expiry sweeping**: a background task physically removes rows whose
//!   `expire_at` has passed
//! - **Procedures**: the built-ins from [`procedures`](crate::procedures) are
//!   registered at construction; callers may add their own
//!
//! # Example
//!
//! ```
//! use tuplekit_store::{Field, MemoryTupleStore, SpaceDef, SpaceId, StorageError, Tuple, TupleStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryTupleStore::new();
//!     let space = SpaceId::from(1);
//!     store.create_space(SpaceDef::new(space, 1).unwrap()).unwrap();
//!
//!     let row = Tuple::from(vec![Field::from("k"), Field::Int(1)]);
//!     store.insert(space, row.clone()).await.unwrap();
//!     assert!(matches!(store.insert(space, row).await, Err(StorageError::Conflict)));
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - The sweeper runs on an interval, so expired rows linger until the next
//!   pass (reads still return them; adapters treat them as misses)

use std::{
    collections::{BTreeMap, HashMap, hash_map::Entry},
    ops::Bound,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use fail::fail_point;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};
use tracing::debug;

use crate::{
    backend::TupleStore,
    error::{StorageError, StorageResult},
    expiry,
    procedures::{self, Procedure},
    types::{Field, SpaceDef, SpaceId, Tuple, UpdateOp},
};

/// How often the background sweeper purges expired rows by default.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Rows of a single space, ordered by primary key.
#[derive(Debug, Clone)]
pub struct SpaceData {
    def: SpaceDef,
    rows: BTreeMap<Vec<Field>, Tuple>,
}

impl SpaceData {
    fn new(def: SpaceDef) -> Self {
        Self { def, rows: BTreeMap::new() }
    }

    /// Schema of this space.
    #[must_use]
    pub fn def(&self) -> &SpaceDef {
        &self.def
    }

    /// Row with the given full primary key.
    #[must_use]
    pub fn get(&self, key: &[Field]) -> Option<&Tuple> {
        self.rows.get(key)
    }

    /// Writes `tuple`, returning the row it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTuple`] if the tuple does not fit the
    /// space schema.
    pub fn put(&mut self, tuple: Tuple) -> StorageResult<Option<Tuple>> {
        self.validate(&tuple)?;
        let key = self.def.key_of(&tuple)?;
        Ok(self.rows.insert(key, tuple))
    }

    /// Removes the row with the given primary key.
    pub fn remove(&mut self, key: &[Field]) -> Option<Tuple> {
        self.rows.remove(key)
    }

    /// Rows whose primary key starts with `prefix`, in key order.
    pub fn prefix<'a>(&'a self, prefix: &'a [Field]) -> impl Iterator<Item = &'a Tuple> + 'a {
        self.rows
            .range::<[Field], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(key, _)| key.starts_with(prefix))
            .map(|(_, tuple)| tuple)
    }

    /// Removes and returns every row whose primary key starts with `prefix`.
    pub fn remove_prefix(&mut self, prefix: &[Field]) -> Vec<Tuple> {
        let keys: Vec<Vec<Field>> = self
            .rows
            .range::<[Field], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        keys.iter().filter_map(|key| self.rows.remove(key.as_slice())).collect()
    }

    /// Whether `tuple` is expired at `now` according to this space's expire
    /// field. Always `false` for spaces without one.
    #[must_use]
    pub fn is_expired(&self, tuple: &Tuple, now: i64) -> bool {
        self.def
            .expire_field()
            .and_then(|field| tuple.int(field))
            .is_some_and(|expire_at| expiry::is_expired(expire_at, now))
    }

    /// Number of rows, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the space holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn validate(&self, tuple: &Tuple) -> StorageResult<()> {
        self.def.key_of(tuple)?;
        if let Some(field) = self.def.expire_field() {
            match tuple.get(field) {
                Some(Field::Int(_)) => {},
                Some(other) => {
                    return Err(StorageError::field_type(
                        self.def.id(),
                        field,
                        format!("expire_at must be an integer, got {}", other.type_name()),
                    ));
                },
                None => {
                    return Err(StorageError::invalid_tuple(format!(
                        "space {} expects expire_at in field {field}, tuple has {} fields",
                        self.def.id(),
                        tuple.len()
                    )));
                },
            }
        }
        Ok(())
    }

    fn purge_expired(&mut self, now: i64) -> usize {
        if self.def.expire_field().is_none() {
            return 0;
        }
        let before = self.rows.len();
        let def = self.def;
        self.rows.retain(|_, tuple| {
            !def.expire_field()
                .and_then(|field| tuple.int(field))
                .is_some_and(|expire_at| expiry::is_expired(expire_at, now))
        });
        before - self.rows.len()
    }
}

/// Every space of a store.
///
/// Procedures receive `&mut Spaces` while the store's write lock is held.
#[derive(Debug, Clone, Default)]
pub struct Spaces {
    spaces: HashMap<SpaceId, SpaceData>,
}

impl Spaces {
    /// Defines a space. Redefining a space with an identical schema is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the space already exists with a
    /// different schema.
    pub fn create(&mut self, def: SpaceDef) -> StorageResult<()> {
        match self.spaces.entry(def.id()) {
            Entry::Occupied(existing) if *existing.get().def() == def => Ok(()),
            Entry::Occupied(_) => Err(StorageError::internal(format!(
                "space {} is already defined with a different schema",
                def.id()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(SpaceData::new(def));
                Ok(())
            },
        }
    }

    /// Borrows a space.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownSpace`] if it was never created.
    pub fn space(&self, id: SpaceId) -> StorageResult<&SpaceData> {
        self.spaces.get(&id).ok_or_else(|| StorageError::unknown_space(id))
    }

    /// Mutably borrows a space.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnknownSpace`] if it was never created.
    pub fn space_mut(&mut self, id: SpaceId) -> StorageResult<&mut SpaceData> {
        self.spaces.get_mut(&id).ok_or_else(|| StorageError::unknown_space(id))
    }

    /// Removes every expired row in every space, returning how many went.
    pub fn purge_expired(&mut self, now: i64) -> usize {
        self.spaces.values_mut().map(|space| space.purge_expired(now)).sum()
    }
}

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the sweeper task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// In-memory [`TupleStore`].
///
/// # Cloning
///
/// `MemoryTupleStore` is cheaply cloneable via [`Arc`]. All clones share the
/// same spaces and procedures.
///
/// # Shutdown
///
/// The background sweeper stops when the last clone is dropped, or when
/// [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct MemoryTupleStore {
    spaces: Arc<RwLock<Spaces>>,
    procedures: Arc<RwLock<HashMap<String, Procedure>>>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryTupleStore {
    /// Creates an empty store with the built-in procedures installed.
    ///
    /// Spawns the expiry sweeper on the current Tokio runtime, so this must
    /// be called from within one.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }

    /// Like [`new`](Self::new), with a custom sweeper interval.
    #[must_use]
    pub fn with_sweep_interval(interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let procedures = procedures::builtin()
            .into_iter()
            .map(|(name, procedure)| (name.to_owned(), procedure))
            .collect();
        let store = Self {
            spaces: Arc::new(RwLock::new(Spaces::default())),
            procedures: Arc::new(RwLock::new(procedures)),
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task only holds the data, never the guard, so dropping the
        // last handle still stops it.
        let spaces = Arc::clone(&store.spaces);
        tokio::spawn(async move {
            sweep_expired(spaces, interval, shutdown_rx).await;
        });

        store
    }

    /// Defines a space.
    ///
    /// # Errors
    ///
    /// See [`Spaces::create`].
    pub fn create_space(&self, def: SpaceDef) -> StorageResult<()> {
        self.spaces.write().create(def)
    }

    /// Installs (or overrides) a procedure under `name`.
    pub fn register_procedure(&self, name: impl Into<String>, procedure: Procedure) {
        self.procedures.write().insert(name.into(), procedure);
    }

    /// Removes every expired row right now, without waiting for the sweeper.
    pub fn purge_expired(&self) -> usize {
        self.spaces.write().purge_expired(expiry::unix_timestamp())
    }

    /// Explicitly signals the background sweeper to stop.
    ///
    /// Optional; the task also stops when every clone is dropped.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }
}

impl Default for MemoryTupleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task removing expired rows every `interval`.
async fn sweep_expired(
    spaces: Arc<RwLock<Spaces>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(interval) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let purged = spaces.write().purge_expired(expiry::unix_timestamp());
        if purged > 0 {
            debug!(purged, "swept expired rows");
        }
    }
}

/// Applies `ops` to a copy of `row`, so a failing op leaves the row intact.
fn apply_ops(def: &SpaceDef, row: &Tuple, ops: &[UpdateOp]) -> StorageResult<Tuple> {
    let mut updated = row.clone();
    for op in ops {
        let field = op.field();
        if field < def.key_parts() {
            return Err(StorageError::invalid_tuple(format!(
                "field {field} is part of the primary key of space {}",
                def.id()
            )));
        }

        let fields = updated.fields_mut();
        match op {
            UpdateOp::Add { delta, .. } => {
                let current = fields.get_mut(field).ok_or_else(|| {
                    StorageError::invalid_tuple(format!("no field {field} to add to"))
                })?;
                let Field::Int(value) = current else {
                    return Err(StorageError::field_type(
                        def.id(),
                        field,
                        format!("cannot add to {}", current.type_name()),
                    ));
                };
                *value = value.checked_add(*delta).ok_or_else(|| {
                    StorageError::field_type(def.id(), field, "integer overflow")
                })?;
            },
            UpdateOp::Assign { value, .. } => {
                if field < fields.len() {
                    fields[field] = value.clone();
                } else if field == fields.len() {
                    fields.push(value.clone());
                } else {
                    return Err(StorageError::invalid_tuple(format!(
                        "cannot assign field {field} of a {}-field tuple",
                        fields.len()
                    )));
                }
            },
        }
    }
    Ok(updated)
}

#[async_trait]
impl TupleStore for MemoryTupleStore {
    #[tracing::instrument(skip(self, tuple))]
    async fn insert(&self, space: SpaceId, tuple: Tuple) -> StorageResult<()> {
        let mut spaces = self.spaces.write();
        let data = spaces.space_mut(space)?;
        let key = data.def().key_of(&tuple)?;
        if data.get(&key).is_some() {
            return Err(StorageError::Conflict);
        }
        data.put(tuple)?;
        Ok(())
    }

    #[tracing::instrument(skip(self, tuple))]
    async fn replace(&self, space: SpaceId, tuple: Tuple) -> StorageResult<()> {
        let mut spaces = self.spaces.write();
        spaces.space_mut(space)?.put(tuple)?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, space: SpaceId, key: &[Field]) -> StorageResult<Option<Tuple>> {
        let spaces = self.spaces.read();
        let data = spaces.space(space)?;
        data.def().check_key(key)?;
        Ok(data.get(key).cloned())
    }

    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    async fn get_many(
        &self,
        space: SpaceId,
        keys: &[Vec<Field>],
    ) -> StorageResult<Vec<Option<Tuple>>> {
        let spaces = self.spaces.read();
        let data = spaces.space(space)?;
        keys.iter()
            .map(|key| {
                data.def().check_key(key)?;
                Ok(data.get(key).cloned())
            })
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn select(&self, space: SpaceId, key_prefix: &[Field]) -> StorageResult<Vec<Tuple>> {
        let spaces = self.spaces.read();
        let data = spaces.space(space)?;
        if key_prefix.len() > data.def().key_parts() {
            return Err(StorageError::invalid_tuple(format!(
                "prefix of {} parts is longer than the key of space {space}",
                key_prefix.len()
            )));
        }
        Ok(data.prefix(key_prefix).cloned().collect())
    }

    #[tracing::instrument(skip(self))]
    async fn update(
        &self,
        space: SpaceId,
        key: &[Field],
        ops: &[UpdateOp],
    ) -> StorageResult<Option<Tuple>> {
        let mut spaces = self.spaces.write();
        let data = spaces.space_mut(space)?;
        data.def().check_key(key)?;

        let Some(row) = data.get(key) else {
            return Ok(None);
        };
        let updated = apply_ops(data.def(), row, ops)?;
        data.validate(&updated)?;
        data.rows.insert(key.to_vec(), updated.clone());
        Ok(Some(updated))
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, space: SpaceId, key: &[Field]) -> StorageResult<Option<Tuple>> {
        let mut spaces = self.spaces.write();
        let data = spaces.space_mut(space)?;
        data.def().check_key(key)?;
        Ok(data.remove(key))
    }

    #[tracing::instrument(skip(self, tuples), fields(count = tuples.len()))]
    async fn replace_many(&self, space: SpaceId, tuples: Vec<Tuple>) -> Vec<StorageResult<()>> {
        let mut spaces = self.spaces.write();
        match spaces.space_mut(space) {
            Ok(data) => tuples.into_iter().map(|tuple| data.put(tuple).map(|_| ())).collect(),
            Err(_) => tuples.iter().map(|_| Err(StorageError::unknown_space(space))).collect(),
        }
    }

    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    async fn delete_many(&self, space: SpaceId, keys: &[Vec<Field>]) -> Vec<StorageResult<()>> {
        let mut spaces = self.spaces.write();
        match spaces.space_mut(space) {
            Ok(data) => keys
                .iter()
                .map(|key| {
                    data.def().check_key(key)?;
                    data.remove(key);
                    Ok(())
                })
                .collect(),
            Err(_) => keys.iter().map(|_| Err(StorageError::unknown_space(space))).collect(),
        }
    }

    #[tracing::instrument(skip(self, args), fields(args = args.len()))]
    async fn call(&self, procedure: &str, args: Vec<Field>) -> StorageResult<Vec<Tuple>> {
        fail_point!("memory-store-call", |_| {
            Err(StorageError::internal(format!("injected failure calling {procedure}")))
        });

        let body = self
            .procedures
            .read()
            .get(procedure)
            .cloned()
            .ok_or_else(|| StorageError::unknown_procedure(procedure))?;

        let mut spaces = self.spaces.write();
        body(&mut spaces, &args)
    }

    #[tracing::instrument(skip(self))]
    async fn truncate(&self, space: SpaceId) -> StorageResult<()> {
        let mut spaces = self.spaces.write();
        spaces.space_mut(space)?.rows.clear();
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn len(&self, space: SpaceId) -> StorageResult<usize> {
        let spaces = self.spaces.read();
        Ok(spaces.space(space)?.len())
    }
}
