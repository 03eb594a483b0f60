//! Expiring key-value cache over a tuple store.
//!
//! Rows are `(key, value, expire_at)` in the configured cache space. Values go
//! through the [`codec`](crate::codec), so integers stay bare and can be
//! changed atomically by the store. Expired rows are misses on every read
//! path, whether or not the store has reclaimed them yet.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use tracing::{debug, warn};
use tuplekit_store::{
    ConfigError, Field, SpaceDef, StorageError, Tuple, TupleStore, UpdateOp, expiry, procedures,
};

use crate::{
    codec::{self, CacheValue},
    config::CacheConfig,
    error::{CacheError, CacheResult},
    keys,
    metrics::{Metrics, MetricsCollector},
};

/// Column holding the encoded value.
const VALUE_FIELD: usize = 1;

/// Column holding `expire_at`.
const EXPIRE_FIELD: usize = 2;

/// Lifetime requested for a write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Timeout {
    /// The configured default timeout.
    #[default]
    Default,
    /// This many seconds from now. Zero writes an already expired row.
    Seconds(u64),
    /// Never expires (`expire_at == 0`).
    Never,
}

impl Timeout {
    /// Absolute `expire_at` for a write at `now`.
    fn expire_at(self, now: i64, default: Duration) -> i64 {
        match self {
            Self::Default => expiry::expire_at(now, default),
            Self::Seconds(secs) => expiry::expire_at(now, Duration::from_secs(secs)),
            Self::Never => expiry::NEVER,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        // Sub-second remainders round up, matching expiry::expire_at.
        let secs = value.as_secs() + u64::from(value.subsec_nanos() > 0);
        Self::Seconds(secs)
    }
}

/// The cache adapter.
///
/// Cheap to clone; clones share the store handle and metrics.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tuplekit_cache::{CacheConfig, CacheValue, Timeout, TupleCache};
/// use tuplekit_store::MemoryTupleStore;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = Arc::new(MemoryTupleStore::new());
/// let config = CacheConfig::default();
/// store.create_space(TupleCache::<MemoryTupleStore>::space_def(&config).unwrap()).unwrap();
///
/// let cache = TupleCache::new(store, config);
/// cache.set("hits", &CacheValue::Int(1), Timeout::Default).await.unwrap();
/// assert_eq!(cache.incr("hits", 41).await.unwrap(), 42);
/// # });
/// ```
pub struct TupleCache<S> {
    store: Arc<S>,
    config: CacheConfig,
    metrics: Metrics,
}

impl<S> Clone for TupleCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> fmt::Debug for TupleCache<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleCache").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<S: TupleStore> TupleCache<S> {
    /// Creates a cache over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, config: CacheConfig) -> Self {
        Self { store, config, metrics: Metrics::new() }
    }

    /// Reports into `metrics` instead of a private collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Schema of the cache space: one key field, expiry in field 2.
    ///
    /// # Errors
    ///
    /// Never fails for a validated configuration.
    pub fn space_def(config: &CacheConfig) -> Result<SpaceDef, ConfigError> {
        Ok(SpaceDef::new(config.space(), 1)?.with_expire_field(EXPIRE_FIELD))
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store key for a raw cache key.
    #[must_use]
    pub fn make_key(&self, raw: impl fmt::Display) -> String {
        keys::cache_key(self.config.key_prefix(), self.config.version(), raw)
    }

    fn row(&self, key: String, value: &CacheValue, timeout: Timeout) -> CacheResult<Tuple> {
        let expire_at =
            timeout.expire_at(expiry::unix_timestamp(), self.config.default_timeout());
        Ok(Tuple::from(vec![
            Field::Str(key),
            codec::encode(value)?.into(),
            Field::Int(expire_at),
        ]))
    }

    fn track<T>(&self, result: CacheResult<T>) -> CacheResult<T> {
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    /// Decodes a fetched row, treating expired rows as misses.
    fn live_value(key: &str, row: Option<&Tuple>, now: i64) -> CacheResult<Option<CacheValue>> {
        let Some(row) = row else {
            return Ok(None);
        };
        if !is_live(row, now) {
            return Ok(None);
        }
        let column = row
            .get(VALUE_FIELD)
            .ok_or_else(|| CacheError::corrupt(key, "row has no value column"))?;
        codec::decode(key, column).map(Some).inspect_err(|err| {
            warn!(key, error = %err, "corrupt cache value");
        })
    }

    /// Fetches a value. Missing and expired keys are `None`.
    ///
    /// # Errors
    ///
    /// Store failures and [`CacheError::CorruptValue`].
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn get(&self, key: impl fmt::Display) -> CacheResult<Option<CacheValue>> {
        let key = self.make_key(key);
        let result: CacheResult<_> = async {
            let row = self.store.get(self.config.space(), &[Field::from(key.as_str())]).await?;
            Self::live_value(&key, row.as_ref(), expiry::unix_timestamp())
        }
        .await;

        match &result {
            Ok(Some(_)) => self.metrics.record_cache_hit(),
            Ok(None) => self.metrics.record_cache_miss(),
            Err(_) => {},
        }
        self.track(result)
    }

    /// Fetches a value, falling back to `default` on a miss.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn get_or(
        &self,
        key: impl fmt::Display,
        default: CacheValue,
    ) -> CacheResult<CacheValue> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Writes a value unconditionally.
    ///
    /// # Errors
    ///
    /// Store failures and [`CacheError::Serialization`].
    #[tracing::instrument(skip_all, fields(key = %key, timeout = ?timeout))]
    pub async fn set(
        &self,
        key: impl fmt::Display,
        value: &CacheValue,
        timeout: Timeout,
    ) -> CacheResult<()> {
        let key = self.make_key(key);
        let result: CacheResult<_> = async {
            let row = self.row(key, value, timeout)?;
            self.store.replace(self.config.space(), row).await?;
            Ok(())
        }
        .await;

        if result.is_ok() {
            self.metrics.record_cache_set();
        }
        self.track(result)
    }

    /// Writes a value only if the key is absent or expired.
    ///
    /// Returns `true` when this call wrote the value. Of several concurrent
    /// callers for the same absent key, exactly one gets `true`.
    ///
    /// # Errors
    ///
    /// Store failures other than the insert conflict.
    #[tracing::instrument(skip_all, fields(key = %key, timeout = ?timeout))]
    pub async fn add(
        &self,
        key: impl fmt::Display,
        value: &CacheValue,
        timeout: Timeout,
    ) -> CacheResult<bool> {
        let key = self.make_key(key);
        let result: CacheResult<_> = async {
            let row = self.row(key, value, timeout)?;
            let space = self.config.space();
            match self.store.insert(space, row.clone()).await {
                Ok(()) => Ok(true),
                Err(StorageError::Conflict) => {
                    // Conflicting row may be expired; overwrite it atomically if so.
                    let args = procedures::replace_if_expired_args(space, &row);
                    let written = self.store.call(procedures::REPLACE_IF_EXPIRED, args).await?;
                    Ok(!written.is_empty())
                },
                Err(err) => Err(err.into()),
            }
        }
        .await;

        match result {
            Ok(true) => self.metrics.record_cache_set(),
            Ok(false) => {
                debug!("add lost to a live row");
                self.metrics.record_add_conflict();
            },
            Err(_) => {},
        }
        self.track(result)
    }

    /// Removes a key. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Store failures.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn delete(&self, key: impl fmt::Display) -> CacheResult<()> {
        let key = self.make_key(key);
        let result = self
            .store
            .delete(self.config.space(), &[Field::Str(key)])
            .await
            .map(|_| ())
            .map_err(CacheError::from);

        if result.is_ok() {
            self.metrics.record_cache_delete();
        }
        self.track(result)
    }

    /// Atomically adds `delta` to an integer value and returns the result.
    ///
    /// Negative deltas are allowed.
    ///
    /// # Errors
    ///
    /// - [`CacheError::MissingKey`] if the key is absent or expired
    /// - [`CacheError::NotANumber`] if the value is not an integer
    #[tracing::instrument(skip_all, fields(key = %key, delta))]
    pub async fn incr(&self, key: impl fmt::Display, delta: i64) -> CacheResult<i64> {
        let key = self.make_key(key);
        let result = self.apply_delta(&key, delta).await;
        if result.is_ok() {
            self.metrics.record_cache_incr();
        }
        self.track(result)
    }

    /// Atomically subtracts `delta`. Same rules as [`incr`](Self::incr).
    ///
    /// # Errors
    ///
    /// Same as [`incr`](Self::incr).
    pub async fn decr(&self, key: impl fmt::Display, delta: i64) -> CacheResult<i64> {
        let delta = delta.checked_neg().ok_or_else(|| {
            CacheError::from(StorageError::invalid_tuple("decrement out of range"))
        })?;
        self.incr(key, delta).await
    }

    async fn apply_delta(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let space = self.config.space();
        let store_key = [Field::from(key)];
        let ops = [UpdateOp::Add { field: VALUE_FIELD, delta }];

        let updated = match self.store.update(space, &store_key, &ops).await {
            Ok(Some(row)) => row,
            Ok(None) => return Err(CacheError::missing_key(key)),
            Err(err @ StorageError::FieldType { .. }) => {
                // The store rejects the add without looking at expiry, so an
                // expired row is missing whatever it holds. Overflow on a live
                // integer is a store error; anything else is a blob.
                let current = self.store.get(space, &store_key).await?;
                let Some(row) = current.filter(|row| is_live(row, expiry::unix_timestamp()))
                else {
                    return Err(CacheError::missing_key(key));
                };
                let holds_int = row.int(VALUE_FIELD).is_some();
                return Err(if holds_int { err.into() } else { CacheError::not_a_number(key) });
            },
            Err(err) => return Err(err.into()),
        };

        if !is_live(&updated, expiry::unix_timestamp()) {
            return Err(CacheError::missing_key(key));
        }
        updated.int(VALUE_FIELD).ok_or_else(|| CacheError::not_a_number(key))
    }

    /// Whether a live value exists for `key`.
    ///
    /// # Errors
    ///
    /// Same as [`get`](Self::get).
    pub async fn has_key(&self, key: impl fmt::Display) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Moves the expiry of a live key. Returns `false` for missing or
    /// expired keys, which stay untouched.
    ///
    /// # Errors
    ///
    /// Store failures.
    #[tracing::instrument(skip_all, fields(key = %key, timeout = ?timeout))]
    pub async fn touch(&self, key: impl fmt::Display, timeout: Timeout) -> CacheResult<bool> {
        let key = self.make_key(key);
        let result: CacheResult<_> = async {
            let space = self.config.space();
            let store_key = [Field::Str(key)];
            let now = expiry::unix_timestamp();

            let live =
                self.store.get(space, &store_key).await?.is_some_and(|row| is_live(&row, now));
            if !live {
                return Ok(false);
            }

            let expire_at = timeout.expire_at(now, self.config.default_timeout());
            let ops = [UpdateOp::Assign { field: EXPIRE_FIELD, value: Field::Int(expire_at) }];
            Ok(self.store.update(space, &store_key, &ops).await?.is_some())
        }
        .await;

        if matches!(result, Ok(true)) {
            self.metrics.record_cache_set();
        }
        self.track(result)
    }

    /// Fetches several keys. The map holds only live hits, keyed by the raw
    /// key as given.
    ///
    /// # Errors
    ///
    /// Store failures and [`CacheError::CorruptValue`].
    #[tracing::instrument(skip_all, fields(count = raw_keys.len()))]
    pub async fn get_many<K: fmt::Display>(
        &self,
        raw_keys: &[K],
    ) -> CacheResult<HashMap<String, CacheValue>> {
        let result: CacheResult<HashMap<_, _>> = async {
            let store_keys: Vec<String> = raw_keys.iter().map(|raw| self.make_key(raw)).collect();
            let lookup: Vec<Vec<Field>> =
                store_keys.iter().map(|key| vec![Field::from(key.as_str())]).collect();
            let rows = self.store.get_many(self.config.space(), &lookup).await?;

            let now = expiry::unix_timestamp();
            let mut found = HashMap::with_capacity(rows.len());
            for ((raw, key), row) in raw_keys.iter().zip(&store_keys).zip(&rows) {
                if let Some(value) = Self::live_value(key, row.as_ref(), now)? {
                    found.insert(raw.to_string(), value);
                }
            }
            Ok(found)
        }
        .await;

        if let Ok(found) = &result {
            let hits = found.len() as u64;
            self.metrics.record_cache_reads(hits, raw_keys.len() as u64 - hits);
        }
        self.track(result)
    }

    /// Writes several values with one timeout.
    ///
    /// Every entry is attempted; the first failure is returned afterwards.
    /// Entries written before or after a failure stay written.
    ///
    /// # Errors
    ///
    /// The first per-entry failure.
    #[tracing::instrument(skip_all, fields(count = entries.len(), timeout = ?timeout))]
    pub async fn set_many<K: fmt::Display>(
        &self,
        entries: &[(K, CacheValue)],
        timeout: Timeout,
    ) -> CacheResult<()> {
        let result: CacheResult<_> = async {
            let rows = entries
                .iter()
                .map(|(raw, value)| self.row(self.make_key(raw), value, timeout))
                .collect::<CacheResult<Vec<_>>>()?;
            let results = self.store.replace_many(self.config.space(), rows).await;
            first_error(results, |_| self.metrics.record_cache_set())
        }
        .await;
        self.track(result)
    }

    /// Deletes several keys. Same failure rules as [`set_many`](Self::set_many).
    ///
    /// # Errors
    ///
    /// The first per-key failure.
    #[tracing::instrument(skip_all, fields(count = raw_keys.len()))]
    pub async fn delete_many<K: fmt::Display>(&self, raw_keys: &[K]) -> CacheResult<()> {
        let keys: Vec<Vec<Field>> =
            raw_keys.iter().map(|raw| vec![Field::Str(self.make_key(raw))]).collect();
        let results = self.store.delete_many(self.config.space(), &keys).await;
        let result = first_error(results, |_| self.metrics.record_cache_delete());
        self.track(result)
    }

    /// Removes every row of the cache space.
    ///
    /// This is not scoped to the key prefix: rows written by anything else
    /// sharing the space are removed too.
    ///
    /// # Errors
    ///
    /// Store failures.
    #[tracing::instrument(skip(self))]
    pub async fn clear(&self) -> CacheResult<()> {
        let result = self.store.truncate(self.config.space()).await.map_err(CacheError::from);
        self.track(result)
    }
}

impl<S> MetricsCollector for TupleCache<S> {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

/// Runs `on_ok` per success and returns the first failure, if any.
fn is_live(row: &Tuple, now: i64) -> bool {
    !expiry::is_expired(row.int(EXPIRE_FIELD).unwrap_or(expiry::NEVER), now)
}

fn first_error(
    results: Vec<Result<(), StorageError>>,
    mut on_ok: impl FnMut(&()),
) -> CacheResult<()> {
    let mut first = None;
    for result in results {
        match result {
            Ok(ok) => on_ok(&ok),
            Err(err) => {
                first.get_or_insert(err);
            },
        }
    }
    first.map_or(Ok(()), |err| Err(err.into()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;
    use tuplekit_store::{MemoryTupleStore, SpaceId, testutil::store_with_spaces};

    use super::*;

    fn cache() -> TupleCache<MemoryTupleStore> {
        let config = CacheConfig::default();
        let def = TupleCache::<MemoryTupleStore>::space_def(&config).unwrap();
        let store = store_with_spaces(&[def]);
        TupleCache::new(Arc::new(store), config)
    }

    async fn raw_row(cache: &TupleCache<MemoryTupleStore>, key: &str) -> Option<Tuple> {
        cache.store.get(SpaceId::from(1), &[Field::from(key)]).await.unwrap()
    }

    #[test]
    fn test_timeout_from_duration_rounds_up() {
        assert_eq!(Timeout::from(Duration::from_millis(1500)), Timeout::Seconds(2));
        assert_eq!(Timeout::from(Duration::from_secs(3)), Timeout::Seconds(3));
    }

    #[test]
    fn test_timeout_expire_at() {
        let default = Duration::from_secs(300);
        assert_eq!(Timeout::Default.expire_at(1_000, default), 1_300);
        assert_eq!(Timeout::Seconds(10).expire_at(1_000, default), 1_010);
        assert_eq!(Timeout::Never.expire_at(1_000, default), 0);
    }

    #[tokio::test]
    async fn test_make_key() {
        let cache = cache();
        assert_eq!(cache.make_key("ololo"), ":1:ololo");
        assert_eq!(cache.make_key(123_123), ":1:123123");
    }

    #[tokio::test]
    async fn test_set_stores_integer_bare() {
        let cache = cache();
        cache.set("hits", &CacheValue::Int(1), Timeout::Never).await.unwrap();

        let row = raw_row(&cache, ":1:hits").await.unwrap();
        assert_eq!(row.int(VALUE_FIELD), Some(1));
        assert_eq!(row.int(EXPIRE_FIELD), Some(0));
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache();
        let value = CacheValue::from(json!({"ololo": [1, 2]}));
        cache.set("doc", &value, Timeout::Default).await.unwrap();
        assert_eq!(cache.get("doc").await.unwrap(), Some(value));
    }

    #[tokio::test]
    async fn test_zero_timeout_is_immediately_expired() {
        let cache = cache();
        cache.set("gone", &CacheValue::Int(1), Timeout::Seconds(0)).await.unwrap();
        assert_eq!(cache.get("gone").await.unwrap(), None);
        assert!(raw_row(&cache, ":1:gone").await.is_some());
    }

    #[tokio::test]
    async fn test_add_on_live_key_returns_false() {
        let cache = cache();
        assert!(cache.add("k", &CacheValue::from("first"), Timeout::Default).await.unwrap());
        assert!(!cache.add("k", &CacheValue::from("second"), Timeout::Default).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(CacheValue::from("first")));
        assert_eq!(cache.metrics().snapshot().add_conflicts, 1);
    }

    #[tokio::test]
    async fn test_add_overwrites_expired_key() {
        let cache = cache();
        cache.set("k", &CacheValue::from("stale"), Timeout::Seconds(0)).await.unwrap();
        assert!(cache.add("k", &CacheValue::from("fresh"), Timeout::Default).await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), Some(CacheValue::from("fresh")));
    }

    #[tokio::test]
    async fn test_incr_and_decr() {
        let cache = cache();
        cache.set("n", &CacheValue::Int(10), Timeout::Default).await.unwrap();
        assert_eq!(cache.incr("n", 5).await.unwrap(), 15);
        assert_eq!(cache.incr("n", -20).await.unwrap(), -5);
        assert_eq!(cache.decr("n", 5).await.unwrap(), -10);
        assert_eq!(cache.decr("n", -10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_incr_missing_and_expired_keys() {
        let cache = cache();
        assert!(matches!(cache.incr("absent", 1).await, Err(CacheError::MissingKey { .. })));

        cache.set("old", &CacheValue::Int(1), Timeout::Seconds(0)).await.unwrap();
        assert!(matches!(cache.incr("old", 1).await, Err(CacheError::MissingKey { .. })));
    }

    #[tokio::test]
    async fn test_incr_expired_non_integer_is_missing() {
        let cache = cache();
        cache.set("old", &CacheValue::from("blob"), Timeout::Seconds(0)).await.unwrap();
        assert_eq!(cache.get("old").await.unwrap(), None);
        assert!(matches!(cache.incr("old", 1).await, Err(CacheError::MissingKey { .. })));

        cache.set("big", &CacheValue::Int(i64::MAX), Timeout::Seconds(0)).await.unwrap();
        assert!(matches!(cache.incr("big", 1).await, Err(CacheError::MissingKey { .. })));
    }

    #[tokio::test]
    async fn test_decr_missing_and_non_integer() {
        let cache = cache();
        assert!(matches!(cache.decr("absent", 1).await, Err(CacheError::MissingKey { .. })));

        cache.set("name", &CacheValue::from("ololo"), Timeout::Default).await.unwrap();
        let err = cache.decr("name", 1).await.unwrap_err();
        assert!(matches!(err, CacheError::NotANumber { ref key } if key == ":1:name"));

        cache.set("old", &CacheValue::Int(5), Timeout::Seconds(0)).await.unwrap();
        assert!(matches!(cache.decr("old", 1).await, Err(CacheError::MissingKey { .. })));
    }

    #[tokio::test]
    async fn test_incr_blob_is_not_a_number() {
        let cache = cache();
        cache.set("name", &CacheValue::from("ololo"), Timeout::Default).await.unwrap();
        let err = cache.incr("name", 1).await.unwrap_err();
        assert!(matches!(err, CacheError::NotANumber { ref key } if key == ":1:name"));
        assert_eq!(cache.get("name").await.unwrap(), Some(CacheValue::from("ololo")));
    }

    #[tokio::test]
    async fn test_incr_overflow_is_a_store_error() {
        let cache = cache();
        cache.set("big", &CacheValue::Int(i64::MAX), Timeout::Default).await.unwrap();
        assert!(matches!(
            cache.incr("big", 1).await,
            Err(CacheError::Store(StorageError::FieldType { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let cache = cache();
        cache.set("k", &CacheValue::Int(1), Timeout::Default).await.unwrap();
        cache.delete("k").await.unwrap();
        cache.delete("k").await.unwrap();
        assert!(!cache.has_key("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_value_is_surfaced() {
        let cache = cache();
        let row =
            Tuple::from(vec![Field::from(":1:bad"), Field::from("ololo value"), Field::Int(0)]);
        cache.store.replace(SpaceId::from(1), row).await.unwrap();
        assert!(matches!(cache.get("bad").await, Err(CacheError::CorruptValue { .. })));
        assert_eq!(cache.metrics().snapshot().error_count, 1);
    }

    #[tokio::test]
    async fn test_get_or() {
        let cache = cache();
        assert_eq!(cache.get_or("nope", CacheValue::Int(7)).await.unwrap(), CacheValue::Int(7));
        cache.set("yes", &CacheValue::Int(1), Timeout::Default).await.unwrap();
        assert_eq!(cache.get_or("yes", CacheValue::Int(7)).await.unwrap(), CacheValue::Int(1));
    }

    #[tokio::test]
    async fn test_touch() {
        let cache = cache();
        assert!(!cache.touch("absent", Timeout::Never).await.unwrap());

        cache.set("k", &CacheValue::Int(1), Timeout::Seconds(60)).await.unwrap();
        assert!(cache.touch("k", Timeout::Never).await.unwrap());
        assert_eq!(raw_row(&cache, ":1:k").await.unwrap().int(EXPIRE_FIELD), Some(0));

        cache.set("old", &CacheValue::Int(1), Timeout::Seconds(0)).await.unwrap();
        assert!(!cache.touch("old", Timeout::Never).await.unwrap());
        assert!(!cache.has_key("old").await.unwrap());
    }

    #[tokio::test]
    async fn test_batch_operations() {
        let cache = cache();
        let entries = [("a", CacheValue::Int(1)), ("b", CacheValue::from("two"))];
        cache.set_many(&entries, Timeout::Default).await.unwrap();

        let found = cache.get_many(&["a", "b", "c"]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["a"], CacheValue::Int(1));
        assert_eq!(found["b"], CacheValue::from("two"));

        cache.delete_many(&["a", "c"]).await.unwrap();
        let found = cache.get_many(&["a", "b"]).await.unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_clear_truncates_whole_space() {
        let cache = cache();
        let other = TupleCache::new(
            Arc::clone(&cache.store),
            CacheConfig::builder().key_prefix("other").build().unwrap(),
        );
        cache.set("a", &CacheValue::Int(1), Timeout::Default).await.unwrap();
        other.set("b", &CacheValue::Int(2), Timeout::Default).await.unwrap();

        cache.clear().await.unwrap();
        assert_eq!(other.get("b").await.unwrap(), None);
    }

    #[test]
    fn test_first_error_keeps_first() {
        let mut oks = 0;
        let result = first_error(
            vec![Ok(()), Err(StorageError::timeout()), Err(StorageError::conflict()), Ok(())],
            |_| oks += 1,
        );
        assert_eq!(oks, 2);
        assert!(matches!(result, Err(CacheError::Store(StorageError::Timeout))));
    }
}
