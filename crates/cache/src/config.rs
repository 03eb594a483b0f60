//! Adapter configuration.
//!
//! One struct per adapter, each buildable through a validating `bon` builder
//! or deserializable from a settings file. Durations use `humantime` strings
//! (`"5s"`, `"1day"`) when deserialized.
//!
//! Defaults match the conventional space layout: cache in space 1, buffer
//! counters in 2, buffer extras in 3, task results in 4.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tuplekit_store::{ConfigError, SpaceId};

/// Default cache space.
pub const DEFAULT_CACHE_SPACE: SpaceId = SpaceId(1);

/// Default buffer counter space.
pub const DEFAULT_BUFFER_SPACE: SpaceId = SpaceId(2);

/// Default buffer extra-attribute space.
pub const DEFAULT_BUFFER_EXTRA_SPACE: SpaceId = SpaceId(3);

/// Default task-result space.
pub const DEFAULT_RESULT_SPACE: SpaceId = SpaceId(4);

/// Default cache entry lifetime (5 minutes).
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default task-result lifetime (1 day).
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default delay between opening an accumulation window and delivering it.
pub const DEFAULT_DELIVERY_DELAY: Duration = Duration::from_secs(5);

/// Default cache key version.
pub const DEFAULT_KEY_VERSION: u32 = 1;

fn check_space(field: &'static str, space: SpaceId) -> Result<(), ConfigError> {
    if u32::from(space) == 0 {
        return Err(ConfigError::BelowMinimum { field, min: "1".into(), value: "0".into() });
    }
    Ok(())
}

fn check_duration(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::BelowMinimum { field, min: "1s".into(), value: "0s".into() });
    }
    Ok(())
}

/// Configuration for [`TupleCache`](crate::TupleCache).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tuplekit_cache::CacheConfig;
///
/// let config = CacheConfig::builder()
///     .key_prefix("site")
///     .default_timeout(Duration::from_secs(60))
///     .build()?;
/// assert_eq!(config.version(), 1);
/// # Ok::<(), tuplekit_cache::ConfigError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "default_cache_space")]
    space: SpaceId,

    #[serde(default)]
    key_prefix: String,

    #[serde(default = "default_key_version")]
    version: u32,

    #[serde(with = "humantime_serde", default = "default_cache_timeout")]
    default_timeout: Duration,
}

fn default_cache_space() -> SpaceId {
    DEFAULT_CACHE_SPACE
}

fn default_key_version() -> u32 {
    DEFAULT_KEY_VERSION
}

fn default_cache_timeout() -> Duration {
    DEFAULT_CACHE_TIMEOUT
}

#[bon::bon]
impl CacheConfig {
    /// Creates a validated cache configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the space id or default timeout is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_CACHE_SPACE)] space: SpaceId,
        #[builder(into, default)] key_prefix: String,
        #[builder(default = DEFAULT_KEY_VERSION)] version: u32,
        #[builder(default = DEFAULT_CACHE_TIMEOUT)] default_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { space, key_prefix, version, default_timeout };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the invariants the builder enforces. Call this on
    /// deserialized configurations.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_space("space", self.space)?;
        check_duration("default_timeout", self.default_timeout)
    }

    /// Space holding cache rows.
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Namespace prefix of every key.
    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Key version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Lifetime applied by [`Timeout::Default`](crate::Timeout::Default).
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            space: DEFAULT_CACHE_SPACE,
            key_prefix: String::new(),
            version: DEFAULT_KEY_VERSION,
            default_timeout: DEFAULT_CACHE_TIMEOUT,
        }
    }
}

/// Configuration for [`ResultBackend`](crate::ResultBackend).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultBackendConfig {
    #[serde(default = "default_result_space")]
    space: SpaceId,

    #[serde(with = "humantime_serde", default = "default_result_ttl")]
    ttl: Duration,
}

fn default_result_space() -> SpaceId {
    DEFAULT_RESULT_SPACE
}

fn default_result_ttl() -> Duration {
    DEFAULT_RESULT_TTL
}

#[bon::bon]
impl ResultBackendConfig {
    /// Creates a validated result backend configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the space id or TTL is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_RESULT_SPACE)] space: SpaceId,
        #[builder(default = DEFAULT_RESULT_TTL)] ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { space, ttl };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the builder invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_space("space", self.space)?;
        check_duration("ttl", self.ttl)
    }

    /// Space holding result rows.
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Lifetime of a stored result.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for ResultBackendConfig {
    fn default() -> Self {
        Self { space: DEFAULT_RESULT_SPACE, ttl: DEFAULT_RESULT_TTL }
    }
}

/// Configuration for [`CoalescingBuffer`](crate::CoalescingBuffer).
///
/// # Example
///
/// ```
/// use tuplekit_cache::BufferConfig;
/// use tuplekit_store::SpaceId;
///
/// let err = BufferConfig::builder()
///     .space(SpaceId::from(2))
///     .extra_space(SpaceId::from(2))
///     .build();
/// assert!(err.is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BufferConfig {
    #[serde(default = "default_buffer_space")]
    space: SpaceId,

    #[serde(default = "default_buffer_extra_space")]
    extra_space: SpaceId,

    #[serde(with = "humantime_serde", default = "default_delivery_delay")]
    delay: Duration,
}

fn default_buffer_space() -> SpaceId {
    DEFAULT_BUFFER_SPACE
}

fn default_buffer_extra_space() -> SpaceId {
    DEFAULT_BUFFER_EXTRA_SPACE
}

fn default_delivery_delay() -> Duration {
    DEFAULT_DELIVERY_DELAY
}

#[bon::bon]
impl BufferConfig {
    /// Creates a validated buffer configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a space id is zero, both spaces are the
    /// same, or the delay is zero.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_BUFFER_SPACE)] space: SpaceId,
        #[builder(default = DEFAULT_BUFFER_EXTRA_SPACE)] extra_space: SpaceId,
        #[builder(default = DEFAULT_DELIVERY_DELAY)] delay: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { space, extra_space, delay };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks the builder invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_space("space", self.space)?;
        check_space("extra_space", self.extra_space)?;
        if self.space == self.extra_space {
            return Err(ConfigError::MustDiffer {
                field: "extra_space",
                other: "space",
                value: self.space.to_string(),
            });
        }
        check_duration("delay", self.delay)
    }

    /// Space holding counter rows.
    #[must_use]
    pub fn space(&self) -> SpaceId {
        self.space
    }

    /// Space holding extra attribute rows.
    #[must_use]
    pub fn extra_space(&self) -> SpaceId {
        self.extra_space
    }

    /// Delay before a window's delivery runs.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            space: DEFAULT_BUFFER_SPACE,
            extra_space: DEFAULT_BUFFER_EXTRA_SPACE,
            delay: DEFAULT_DELIVERY_DELAY,
        }
    }
}
