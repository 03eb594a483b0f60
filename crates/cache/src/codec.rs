//! Value codec shared by every adapter.
//!
//! A stored value column holds one of two shapes:
//!
//! - **Integer fast-path**: a bare integer, stored unmodified. Only values the
//!   caller tagged as [`CacheValue::Int`] take this path, which is what lets
//!   the store apply atomic arithmetic to them.
//! - **Opaque blob**: [`BLOB_SENTINEL`] (eight ASCII spaces) followed by the
//!   JSON serialization of the value. Everything else takes this path,
//!   including booleans, floats, and JSON numbers.
//!
//! Decoding is the exact inverse. A column that is neither an integer nor a
//! sentinel-prefixed payload is reported as [`CacheError::CorruptValue`].

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, de::DeserializeOwned};
use tuplekit_store::Field;

use crate::error::{CacheError, CacheResult};

/// Padding written in front of every serialized blob.
pub const BLOB_SENTINEL: &[u8; 8] = b"        ";

/// A value as the caller hands it to the cache.
///
/// The variant is chosen at the call site: only `Int` is eligible for atomic
/// `incr`/`decr`.
///
/// # Examples
///
/// ```
/// use tuplekit_cache::CacheValue;
///
/// let hits = CacheValue::from(100);
/// let name = CacheValue::from("ololo");
/// assert_eq!(hits.as_int(), Some(100));
/// assert_eq!(name.as_int(), None);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    /// Stored as a bare integer.
    Int(i64),
    /// Stored as a sentinel-prefixed JSON blob.
    Other(serde_json::Value),
}

impl CacheValue {
    /// Serializes any value into [`CacheValue::Other`].
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if `value` cannot be represented
    /// as JSON.
    pub fn other<T: Serialize + ?Sized>(value: &T) -> CacheResult<Self> {
        serde_json::to_value(value).map(Self::Other).map_err(|source| CacheError::Serialization {
            message: "value is not representable as JSON".into(),
            source,
        })
    }

    /// Integer payload, if this is the fast-path variant.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Other(_) => None,
        }
    }

    /// Deserializes the value into `T`.
    ///
    /// Works for both variants; an `Int` deserializes as a JSON number.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] if the value does not have the
    /// shape of `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> CacheResult<T> {
        let json = match self {
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Other(value) => value.clone(),
        };
        serde_json::from_value(json).map_err(|source| CacheError::Serialization {
            message: "stored value has an unexpected shape".into(),
            source,
        })
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        Self::Other(serde_json::Value::from(value))
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        Self::Other(serde_json::Value::from(value))
    }
}

impl From<serde_json::Value> for CacheValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Other(value)
    }
}

/// The on-store shape of a value column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedValue {
    /// Bare integer.
    RawInt(i64),
    /// Sentinel followed by the serialized payload.
    Blob(Bytes),
}

impl From<EncodedValue> for Field {
    fn from(value: EncodedValue) -> Self {
        match value {
            EncodedValue::RawInt(n) => Field::Int(n),
            EncodedValue::Blob(bytes) => Field::Bytes(bytes),
        }
    }
}

/// Encodes a cache value, taking the integer fast-path for [`CacheValue::Int`].
///
/// # Errors
///
/// Returns [`CacheError::Serialization`] if the payload cannot be serialized.
pub fn encode(value: &CacheValue) -> CacheResult<EncodedValue> {
    match value {
        CacheValue::Int(n) => Ok(EncodedValue::RawInt(*n)),
        CacheValue::Other(json) => encode_blob(json),
    }
}

/// Encodes any serializable value on the blob path.
///
/// # Errors
///
/// Returns [`CacheError::Serialization`] if the payload cannot be serialized.
pub fn encode_blob<T: Serialize + ?Sized>(value: &T) -> CacheResult<EncodedValue> {
    let mut buf = BytesMut::with_capacity(BLOB_SENTINEL.len() + 32);
    buf.put_slice(BLOB_SENTINEL);
    serde_json::to_writer((&mut buf).writer(), value).map_err(|source| {
        CacheError::Serialization { message: "failed to serialize value".into(), source }
    })?;
    Ok(EncodedValue::Blob(buf.freeze()))
}

/// Decodes a stored value column read from `key`.
///
/// # Errors
///
/// Returns [`CacheError::CorruptValue`] if the column is neither an integer
/// nor a well-formed sentinel blob.
pub fn decode(key: &str, column: &Field) -> CacheResult<CacheValue> {
    match column {
        Field::Int(n) => Ok(CacheValue::Int(*n)),
        other => decode_blob(key, other).map(CacheValue::Other),
    }
}

/// Decodes a column that must be on the blob path.
///
/// # Errors
///
/// Returns [`CacheError::CorruptValue`] for integers, missing sentinels, and
/// payloads that are not valid JSON.
pub fn decode_blob(key: &str, column: &Field) -> CacheResult<serde_json::Value> {
    let raw: &[u8] = match column {
        Field::Bytes(bytes) => &bytes[..],
        Field::Str(text) => text.as_bytes(),
        Field::Int(_) => return Err(CacheError::corrupt(key, "expected a blob, found an integer")),
    };

    let payload = raw
        .strip_prefix(BLOB_SENTINEL.as_slice())
        .ok_or_else(|| CacheError::corrupt(key, "missing blob sentinel"))?;
    serde_json::from_slice(payload)
        .map_err(|err| CacheError::corrupt(key, format!("invalid blob payload: {err}")))
}
