//! Task-result store.
//!
//! Results are `(task key, blob, expire_at)` rows in the result space. Every
//! value takes the blob path, integers included, and every row expires after
//! the configured TTL. Keys are used verbatim.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;
use tuplekit_store::{ConfigError, Field, SpaceDef, Tuple, TupleStore, UpdateOp, expiry};

use crate::{
    codec,
    config::ResultBackendConfig,
    error::{CacheError, CacheResult},
    metrics::{Metrics, MetricsCollector},
};

const VALUE_FIELD: usize = 1;
const EXPIRE_FIELD: usize = 2;

/// State of a task result.
///
/// `Pending` is distinct from every storable value, `null` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum TaskResult {
    /// Nothing stored, or the stored result expired.
    Pending,
    /// The stored result.
    Ready(serde_json::Value),
}

impl TaskResult {
    /// The stored value, if ready.
    #[must_use]
    pub fn into_ready(self) -> Option<serde_json::Value> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending => None,
        }
    }

    /// Whether a result is available.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// Result backend adapter.
pub struct ResultBackend<S> {
    store: Arc<S>,
    config: ResultBackendConfig,
    metrics: Metrics,
}

impl<S> Clone for ResultBackend<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S> fmt::Debug for ResultBackend<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultBackend").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<S: TupleStore> ResultBackend<S> {
    /// Creates a result backend over `store`.
    #[must_use]
    pub fn new(store: Arc<S>, config: ResultBackendConfig) -> Self {
        Self { store, config, metrics: Metrics::new() }
    }

    /// Reports into `metrics` instead of a private collector.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Schema of the result space: one key field, expiry in field 2.
    ///
    /// # Errors
    ///
    /// Never fails for a validated configuration.
    pub fn space_def(config: &ResultBackendConfig) -> Result<SpaceDef, ConfigError> {
        Ok(SpaceDef::new(config.space(), 1)?.with_expire_field(EXPIRE_FIELD))
    }

    fn track<T>(&self, result: CacheResult<T>) -> CacheResult<T> {
        if result.is_err() {
            self.metrics.record_error();
        }
        result
    }

    fn decode_row(key: &str, row: Option<&Tuple>, now: i64) -> CacheResult<TaskResult> {
        let Some(row) = row else {
            return Ok(TaskResult::Pending);
        };
        if expiry::is_expired(row.int(EXPIRE_FIELD).unwrap_or(expiry::NEVER), now) {
            return Ok(TaskResult::Pending);
        }
        let column = row
            .get(VALUE_FIELD)
            .ok_or_else(|| CacheError::corrupt(key, "row has no value column"))?;
        codec::decode_blob(key, column).map(TaskResult::Ready).inspect_err(|err| {
            warn!(key, error = %err, "corrupt task result");
        })
    }

    /// Looks up a result.
    ///
    /// # Errors
    ///
    /// Store failures and [`CacheError::CorruptValue`].
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, key: &str) -> CacheResult<TaskResult> {
        self.metrics.record_result_get();
        let result: CacheResult<_> = async {
            let row = self.store.get(self.config.space(), &[Field::from(key)]).await?;
            Self::decode_row(key, row.as_ref(), expiry::unix_timestamp())
        }
        .await;
        self.track(result)
    }

    /// Stores a result, replacing any previous one. It expires after the
    /// configured TTL.
    ///
    /// # Errors
    ///
    /// Store failures and [`CacheError::Serialization`].
    #[tracing::instrument(skip(self, value))]
    pub async fn set<T: Serialize + Sync + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        let result: CacheResult<_> = async {
            let encoded = codec::encode_blob(value)?;
            let expire_at = expiry::expire_at(expiry::unix_timestamp(), self.config.ttl());
            let row = Tuple::from(vec![Field::from(key), encoded.into(), Field::Int(expire_at)]);
            self.store.replace(self.config.space(), row).await?;
            Ok(())
        }
        .await;

        if result.is_ok() {
            self.metrics.record_result_set();
        }
        self.track(result)
    }

    /// Forgets a result. Deleting a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Store failures.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> CacheResult<()> {
        let result = self
            .store
            .delete(self.config.space(), &[Field::from(key)])
            .await
            .map(|_| ())
            .map_err(CacheError::from);
        self.track(result)
    }

    /// Looks up several results, one entry per distinct key.
    ///
    /// # Errors
    ///
    /// Store failures and [`CacheError::CorruptValue`].
    #[tracing::instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn mget<K: AsRef<str> + Sync>(
        &self,
        keys: &[K],
    ) -> CacheResult<HashMap<String, TaskResult>> {
        let result: CacheResult<HashMap<_, _>> = async {
            let lookup: Vec<Vec<Field>> =
                keys.iter().map(|key| vec![Field::from(key.as_ref())]).collect();
            let rows = self.store.get_many(self.config.space(), &lookup).await?;

            let now = expiry::unix_timestamp();
            keys.iter()
                .zip(&rows)
                .map(|(key, row)| {
                    let key = key.as_ref();
                    Ok::<_, CacheError>((key.to_owned(), Self::decode_row(key, row.as_ref(), now)?))
                })
                .collect()
        }
        .await;
        self.track(result)
    }

    /// Rewrites the expiry of a stored result to `ttl` from now.
    ///
    /// Returns `false` when nothing is stored under `key`.
    ///
    /// # Errors
    ///
    /// Store failures.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let expire_at = expiry::expire_at(expiry::unix_timestamp(), ttl);
        let ops = [UpdateOp::Assign { field: EXPIRE_FIELD, value: Field::Int(expire_at) }];
        let result = self
            .store
            .update(self.config.space(), &[Field::from(key)], &ops)
            .await
            .map(|row| row.is_some())
            .map_err(CacheError::from);
        self.track(result)
    }
}

impl<S> MetricsCollector for ResultBackend<S> {
    fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}
