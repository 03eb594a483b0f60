//! Write-coalescing counter buffer.
//!
//! High-frequency increments of a model row's counter columns are merged in
//! the tuple store and handed to a [`BufferConsumer`] once per accumulation
//! window, instead of one write per event.
//!
//! # Protocol
//!
//! ```text
//! incr ──► extra rows      replace (extra key, field, blob, 0)
//!      ──► counter rows    insert (column key, delta, 0)
//!                           ├─ ok: row created, this call opened the window
//!                           └─ conflict: atomic add; row gone? insert again
//!      ──► scheduler       one request for the columns this call created
//!                           └─ failed: delete the created rows, merge back
//!                              what other callers added meanwhile
//!
//! process ──► counter rows delete-returning-old, per column
//!         ──► extra rows   drain by key prefix, one procedure call
//!                           └─ failed: merge the drained deltas back
//!         ──► consumer     once, unless every drained delta is zero
//! ```
//!
//! Exactly one caller creates each counter row, so each window is scheduled
//! once. Deleting the row on drain makes the next increment create it again
//! and open the next window. A delivery that runs twice finds nothing the
//! second time and is skipped. A merge-back that recreates a row schedules
//! it like any other creation, so no row is left open without a delivery
//! unless the scheduler fails again.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use fail::fail_point;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};
use tuplekit_store::{
    ConfigError, Field, SpaceDef, StorageError, Tuple, TupleStore, expiry, procedures,
};

use crate::{
    codec,
    config::BufferConfig,
    error::{CacheError, CacheResult},
    keys::{BufferKeys, Filters, ModelLabel},
    metrics::{Metrics, MetricsCollector},
};

/// Counter deltas by column name.
pub type Columns = BTreeMap<String, i64>;

/// Extra attributes by field name. Last write wins within a window.
pub type Extra = BTreeMap<String, serde_json::Value>;

const DELTA_FIELD: usize = 1;
const COUNTER_EXPIRE_FIELD: usize = 2;
const EXTRA_VALUE_FIELD: usize = 2;
const EXTRA_EXPIRE_FIELD: usize = 3;

/// Insert/add rounds before giving up on a row that keeps being drained
/// underneath us.
const MAX_MERGE_ATTEMPTS: usize = 16;

/// Payload of a scheduled delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRequest {
    /// Model whose row is being counted.
    pub model: ModelLabel,
    /// Columns whose counter rows the scheduling call created, with the
    /// delta it wrote. Only the names matter to [`CoalescingBuffer::process`].
    pub columns: Columns,
    /// Filters identifying the row.
    pub filters: Filters,
}

/// Merged increments handed to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Model whose row is being updated.
    pub model: ModelLabel,
    /// Summed deltas per drained column.
    pub columns: Columns,
    /// Filters identifying the row.
    pub filters: Filters,
    /// Extra attributes written during the window, `None` if there were none.
    pub extra: Option<Extra>,
}

/// What [`CoalescingBuffer::process`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The consumer was called.
    Delivered,
    /// Every drained delta was zero; the consumer was not called.
    Skipped,
}

/// Defers a delivery. Implementations are expected to deliver at least once.
#[async_trait]
pub trait DeliveryScheduler: Send + Sync {
    /// Arranges for `request` to be processed after `delay`.
    ///
    /// # Errors
    ///
    /// [`CacheError::Delivery`] if the request could not be queued.
    async fn schedule(&self, request: DeliveryRequest, delay: Duration) -> CacheResult<()>;
}

/// Applies merged increments to persistent records.
#[async_trait]
pub trait BufferConsumer: Send + Sync {
    /// Applies one window's merged increments.
    ///
    /// # Errors
    ///
    /// [`CacheError::Delivery`] wrapping the consumer's own failure.
    async fn apply(&self, delivery: Delivery) -> CacheResult<()>;
}

/// The coalescing buffer.
pub struct CoalescingBuffer<S> {
    store: Arc<S>,
    scheduler: Arc<dyn DeliveryScheduler>,
    consumer: Arc<dyn BufferConsumer>,
    config: BufferConfig,
    metrics: Metrics,
}

impl<S> Clone for CoalescingBuffer<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            scheduler: Arc::clone(&self.scheduler),
            consumer: Arc::clone(&self.consumer),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> fmt::Debug for CoalescingBuffer<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingBuffer").field("config", &self.config).finish_non_exhaustive()
    }
}

#[bon::bon]
impl<S: TupleStore> CoalescingBuffer<S> {
    /// Creates a buffer.
    ///
    /// `metrics` defaults to a private collector.
    #[builder]
    pub fn new(
        store: Arc<S>,
        scheduler: Arc<dyn DeliveryScheduler>,
        consumer: Arc<dyn BufferConsumer>,
        #[builder(default)] config: BufferConfig,
        #[builder(default)] metrics: Metrics,
    ) -> Self {
        Self { store, scheduler, consumer, config, metrics }
    }

    /// Schemas of the counter space `(column key, delta, expire_at)` and the
    /// extra space `(extra key, field, blob, expire_at)`.
    ///
    /// # Errors
    ///
    /// Never fails for a validated configuration.
    pub fn space_defs(config: &BufferConfig) -> Result<[SpaceDef; 2], ConfigError> {
        Ok([
            SpaceDef::new(config.space(), 1)?.with_expire_field(COUNTER_EXPIRE_FIELD),
            SpaceDef::new(config.extra_space(), 2)?.with_expire_field(EXTRA_EXPIRE_FIELD),
        ])
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    fn track<T>(&self, result: CacheResult<T>) -> CacheResult<T> {
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    /// Adds `columns` to the row identified by `(model, filters)` and records
    /// `extra` attributes for it.
    ///
    /// If this call created a counter row, a delivery for the created columns
    /// is scheduled after the configured delay. Calls that only add to
    /// existing rows schedule nothing.
    ///
    /// # Errors
    ///
    /// Store, serialization and scheduler failures. Increments applied
    /// before a store failure stay applied. On a scheduler failure the
    /// counter rows this call created are withdrawn, while deltas it merged
    /// into already open windows stay applied.
    #[tracing::instrument(
        skip(self, columns, filters, extra),
        fields(model = %model, columns = columns.len(), extra = extra.len())
    )]
    pub async fn incr(
        &self,
        model: &ModelLabel,
        columns: &Columns,
        filters: &Filters,
        extra: &Extra,
    ) -> CacheResult<()> {
        self.metrics.record_buffer_increment();
        let result = self.incr_inner(model, columns, filters, extra).await;
        self.track(result)
    }

    async fn incr_inner(
        &self,
        model: &ModelLabel,
        columns: &Columns,
        filters: &Filters,
        extra: &Extra,
    ) -> CacheResult<()> {
        let keys = BufferKeys::new(model, filters);

        // Extras go first so the window that sees these deltas also sees them.
        if !extra.is_empty() {
            let extra_key = keys.extra();
            let mut rows = Vec::with_capacity(extra.len());
            for (name, value) in extra {
                rows.push(Tuple::from(vec![
                    Field::from(extra_key.as_str()),
                    Field::from(name.as_str()),
                    codec::encode_blob(value)?.into(),
                    Field::Int(expiry::NEVER),
                ]));
            }
            for result in self.store.replace_many(self.config.extra_space(), rows).await {
                result?;
            }
        }

        let mut created = Columns::new();
        for (name, &delta) in columns {
            if self.merge_delta(&keys.column(name), delta).await? {
                created.insert(name.clone(), delta);
            }
        }

        if created.is_empty() {
            trace!("joined open window");
            return Ok(());
        }

        debug!(created = created.len(), "opened accumulation window");
        let request = DeliveryRequest {
            model: model.clone(),
            columns: created.clone(),
            filters: filters.clone(),
        };
        if let Err(err) = self.scheduler.schedule(request, self.config.delay()).await {
            warn!(error = %err, "scheduling failed, withdrawing the opened window");
            self.withdraw(model, filters, &keys, &created).await;
            return Err(err);
        }
        self.metrics.record_window_opened();
        Ok(())
    }

    /// Deletes the counter rows this call created but could not schedule.
    ///
    /// Deltas other callers merged into those rows in the meantime are put
    /// back, so only this call's own increment is withdrawn.
    async fn withdraw(
        &self,
        model: &ModelLabel,
        filters: &Filters,
        keys: &BufferKeys,
        own: &Columns,
    ) {
        let mut leftover = Columns::new();
        for (name, &delta) in own {
            let key = [Field::from(keys.column(name))];
            match self.store.delete(self.config.space(), &key).await {
                Ok(Some(row)) => {
                    let joined = row.int(DELTA_FIELD).map_or(0, |total| total - delta);
                    leftover.insert(name.clone(), joined);
                },
                // Drained by a manual process call; nothing left to take back.
                Ok(None) => {},
                Err(err) => warn!(column = %name, error = %err, "could not withdraw counter row"),
            }
        }
        self.reopen(model, filters, keys, &leftover).await;
    }

    /// Merges `deltas` back into the counter rows, scheduling a delivery for
    /// any row this recreates. Failures are logged, not returned.
    async fn reopen(
        &self,
        model: &ModelLabel,
        filters: &Filters,
        keys: &BufferKeys,
        deltas: &Columns,
    ) {
        let mut created = Columns::new();
        for (name, &delta) in deltas.iter().filter(|(_, delta)| **delta != 0) {
            match self.merge_delta(&keys.column(name), delta).await {
                Ok(true) => {
                    created.insert(name.clone(), delta);
                },
                Ok(false) => {},
                Err(err) => {
                    error!(column = %name, delta, error = %err, "could not restore counter delta");
                },
            }
        }
        if created.is_empty() {
            return;
        }

        let request =
            DeliveryRequest { model: model.clone(), columns: created, filters: filters.clone() };
        match self.scheduler.schedule(request, self.config.delay()).await {
            Ok(()) => self.metrics.record_window_opened(),
            Err(err) => error!(error = %err, "restored counters could not be scheduled"),
        }
    }

    /// Adds `delta` to one counter row. Returns `true` if this call created it.
    async fn merge_delta(&self, key: &str, delta: i64) -> CacheResult<bool> {
        let space = self.config.space();
        let store_key = [Field::from(key)];

        for _ in 0..MAX_MERGE_ATTEMPTS {
            let row = Tuple::from(vec![Field::from(key), Field::Int(delta), Field::Int(0)]);
            match self.store.insert(space, row).await {
                Ok(()) => return Ok(true),
                Err(StorageError::Conflict) => {},
                Err(err) => return Err(err.into()),
            }

            if self.store.increment(space, &store_key, DELTA_FIELD, delta).await?.is_some() {
                return Ok(false);
            }
            trace!(key, "counter row drained between insert and add, retrying");
        }

        Err(StorageError::internal(format!(
            "counter row '{key}' vanished {MAX_MERGE_ATTEMPTS} times while merging"
        ))
        .into())
    }

    /// Drains the row identified by `(model, filters)` and delivers the merged
    /// increments once.
    ///
    /// Only the names in `columns` are used; their values are ignored.
    ///
    /// # Errors
    ///
    /// Store, decoding and consumer failures. Counters drained before the
    /// extra rows could be drained are merged back and rescheduled; once the
    /// extra rows are drained, a later failure loses the window.
    #[tracing::instrument(
        skip(self, columns, filters),
        fields(model = %model, columns = columns.len())
    )]
    pub async fn process(
        &self,
        model: &ModelLabel,
        columns: &Columns,
        filters: &Filters,
    ) -> CacheResult<ProcessOutcome> {
        let result = self.process_inner(model, columns, filters).await;
        match result {
            Ok(ProcessOutcome::Delivered) => self.metrics.record_delivery(),
            Ok(ProcessOutcome::Skipped) => self.metrics.record_delivery_skipped(),
            Err(_) => {},
        }
        self.track(result)
    }

    async fn process_inner(
        &self,
        model: &ModelLabel,
        columns: &Columns,
        filters: &Filters,
    ) -> CacheResult<ProcessOutcome> {
        let keys = BufferKeys::new(model, filters);

        let mut merged = Columns::new();
        for name in columns.keys() {
            let key = [Field::from(keys.column(name))];
            let drained = self.store.delete(self.config.space(), &key).await?;
            let delta = drained.and_then(|row| row.int(DELTA_FIELD)).unwrap_or(0);
            merged.insert(name.clone(), delta);
        }

        let extra_key = keys.extra();
        let rows = match self.drain_extra(&extra_key).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "extra drain failed, restoring drained counters");
                self.reopen(model, filters, &keys, &merged).await;
                return Err(err);
            },
        };

        let mut extra = Extra::new();
        for row in rows {
            let name = row
                .str(1)
                .ok_or_else(|| CacheError::corrupt(&extra_key, "extra row has no field name"))?
                .to_owned();
            let column = row
                .get(EXTRA_VALUE_FIELD)
                .ok_or_else(|| CacheError::corrupt(&extra_key, "extra row has no value"))?;
            extra.insert(name, codec::decode_blob(&extra_key, column)?);
        }

        if merged.values().all(|&delta| delta == 0) {
            debug!(dropped_extra = extra.len(), "nothing accumulated, skipping delivery");
            return Ok(ProcessOutcome::Skipped);
        }

        let delivery = Delivery {
            model: model.clone(),
            columns: merged,
            filters: filters.clone(),
            extra: (!extra.is_empty()).then_some(extra),
        };
        self.consumer.apply(delivery).await?;
        Ok(ProcessOutcome::Delivered)
    }

    async fn drain_extra(&self, extra_key: &str) -> CacheResult<Vec<Tuple>> {
        fail_point!("buffer-drain-extra", |_| {
            Err(CacheError::from(StorageError::connection("injected failure before extra drain")))
        });

        let prefix = [Field::from(extra_key)];
        let args = procedures::drain_prefix_args(self.config.extra_space(), &prefix);
        Ok(self.store.call(procedures::DRAIN_PREFIX, args).await?)
    }

    /// Processes a scheduled request.
    ///
    /// # Errors
    ///
    /// Same as [`process`](Self::process).
    pub async fn process_request(&self, request: &DeliveryRequest) -> CacheResult<ProcessOutcome> {
        self.process(&request.model, &request.columns, &request.filters).await
    }
}

impl<S> MetricsCollector for CoalescingBuffer<S> {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
