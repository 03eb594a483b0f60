//! Common types used across store operations.
//!
//! Tuples are flat sequences of [`Field`]s. Each space declares how many
//! leading fields form its primary key and, optionally, which field carries
//! the `expire_at` timestamp.

use std::fmt;

use bytes::Bytes;

use crate::error::{ConfigError, StorageError, StorageResult};

/// Macro to define a newtype wrapper around an integer id with standard trait
/// implementations.
///
/// Each generated type:
/// - Is a transparent wrapper (zero runtime cost)
/// - Derives `Copy`, `Clone`, `Debug`, `PartialEq`, `Eq`, `Hash`, `PartialOrd`, `Ord`
/// - Derives `Serialize` and `Deserialize` (transparent)
/// - Implements `From` in both directions for the raw integer
/// - Implements `Display` that outputs the inner value
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident($raw:ty)) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub $raw);

        impl From<$raw> for $name {
            fn from(value: $raw) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $raw {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Numeric identifier of a space (a table with a fixed primary-key schema).
    ///
    /// # Examples
    ///
    /// ```
    /// use tuplekit_store::SpaceId;
    ///
    /// let space = SpaceId::from(2);
    /// assert_eq!(u32::from(space), 2);
    /// assert_eq!(space.to_string(), "2");
    /// ```
    SpaceId(u32)
);

/// A single tuple column.
///
/// Ordering is by variant first (`Int < Str < Bytes`), then by value, which
/// gives primary keys a stable total order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Signed 64-bit integer. Supports atomic arithmetic updates.
    Int(i64),
    /// UTF-8 string.
    Str(String),
    /// Opaque binary payload.
    Bytes(Bytes),
}

impl Field {
    /// Returns the integer value, if this is an [`Field::Int`].
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string value, if this is a [`Field::Str`].
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the binary payload, if this is a [`Field::Bytes`].
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "integer",
            Self::Str(_) => "string",
            Self::Bytes(_) => "binary",
        }
    }
}

impl From<i64> for Field {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Bytes> for Field {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Field {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// A row stored in a space.
///
/// # Examples
///
/// ```
/// use tuplekit_store::{Field, Tuple};
///
/// let row = Tuple::from(vec![Field::from(":1:answer"), Field::Int(42), Field::Int(0)]);
/// assert_eq!(row.int(1), Some(42));
/// assert_eq!(row.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tuple(Vec<Field>);

impl Tuple {
    /// Creates a tuple from its fields.
    #[must_use]
    pub fn new(fields: Vec<Field>) -> Self {
        Self(fields)
    }

    /// Returns the field at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Field> {
        self.0.get(index)
    }

    /// Returns the field at `index` as an integer.
    #[must_use]
    pub fn int(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Field::as_int)
    }

    /// Returns the field at `index` as a string.
    #[must_use]
    pub fn str(&self, index: usize) -> Option<&str> {
        self.get(index).and_then(Field::as_str)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the tuple has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrows all fields.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.0
    }

    /// Mutable access used when applying update operations.
    pub(crate) fn fields_mut(&mut self) -> &mut Vec<Field> {
        &mut self.0
    }

    /// Consumes the tuple, returning its fields.
    #[must_use]
    pub fn into_fields(self) -> Vec<Field> {
        self.0
    }
}

impl From<Vec<Field>> for Tuple {
    fn from(fields: Vec<Field>) -> Self {
        Self(fields)
    }
}

/// A single field modification applied by
/// [`TupleStore::update`](crate::TupleStore::update).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOp {
    /// Atomically adds `delta` to an integer field.
    Add {
        /// Zero-based field number.
        field: usize,
        /// Signed amount to add.
        delta: i64,
    },
    /// Overwrites a field. Assigning one past the last field appends.
    Assign {
        /// Zero-based field number.
        field: usize,
        /// New value.
        value: Field,
    },
}

impl UpdateOp {
    /// Field number this operation touches.
    #[must_use]
    pub fn field(&self) -> usize {
        match self {
            Self::Add { field, .. } | Self::Assign { field, .. } => *field,
        }
    }
}

/// Schema of a space.
///
/// # Examples
///
/// ```
/// use tuplekit_store::{SpaceDef, SpaceId};
///
/// // (key, value, expire_at)
/// let cache = SpaceDef::new(SpaceId::from(1), 1)?.with_expire_field(2);
/// assert_eq!(cache.key_parts(), 1);
/// assert_eq!(cache.expire_field(), Some(2));
/// # Ok::<(), tuplekit_store::ConfigError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceDef {
    id: SpaceId,
    key_parts: usize,
    expire_field: Option<usize>,
}

impl SpaceDef {
    /// Creates a space definition whose primary key is the first
    /// `key_parts` fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::BelowMinimum`] if `key_parts` is zero.
    pub fn new(id: SpaceId, key_parts: usize) -> Result<Self, ConfigError> {
        if key_parts == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "key_parts",
                min: "1".into(),
                value: "0".into(),
            });
        }
        Ok(Self { id, key_parts, expire_field: None })
    }

    /// Declares which field holds the `expire_at` epoch-seconds column.
    #[must_use]
    pub fn with_expire_field(mut self, field: usize) -> Self {
        self.expire_field = Some(field);
        self
    }

    /// The space id.
    #[must_use]
    pub fn id(&self) -> SpaceId {
        self.id
    }

    /// Number of leading fields that form the primary key.
    #[must_use]
    pub fn key_parts(&self) -> usize {
        self.key_parts
    }

    /// Field carrying `expire_at`, if the space has one.
    #[must_use]
    pub fn expire_field(&self) -> Option<usize> {
        self.expire_field
    }

    /// Extracts the primary key of `tuple`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTuple`] if the tuple is shorter than the key.
    pub fn key_of(&self, tuple: &Tuple) -> StorageResult<Vec<Field>> {
        if tuple.len() < self.key_parts {
            return Err(StorageError::invalid_tuple(format!(
                "space {} needs {} key fields, tuple has {}",
                self.id,
                self.key_parts,
                tuple.len()
            )));
        }
        Ok(tuple.fields()[..self.key_parts].to_vec())
    }

    /// Validates that `key` is a full primary key for this space.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidTuple`] on a length mismatch.
    pub fn check_key(&self, key: &[Field]) -> StorageResult<()> {
        if key.len() != self.key_parts {
            return Err(StorageError::invalid_tuple(format!(
                "space {} key has {} parts, got {}",
                self.id,
                self.key_parts,
                key.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_field_ordering_is_total() {
        let mut fields =
            vec![Field::from("b"), Field::Int(2), Field::from(vec![1u8]), Field::from("a"), Field::Int(-1)];
        fields.sort();
        assert_eq!(
            fields,
            vec![Field::Int(-1), Field::Int(2), Field::from("a"), Field::from("b"), Field::from(vec![1u8])]
        );
    }

    #[test]
    fn test_space_def_rejects_empty_key() {
        assert!(SpaceDef::new(SpaceId::from(1), 0).is_err());
    }

    #[test]
    fn test_key_of_short_tuple() {
        let def = SpaceDef::new(SpaceId::from(3), 2).unwrap();
        let result = def.key_of(&Tuple::from(vec![Field::from("only")]));
        assert!(matches!(result, Err(StorageError::InvalidTuple { .. })));
    }

    #[test]
    fn test_key_of_composite() {
        let def = SpaceDef::new(SpaceId::from(3), 2).unwrap();
        let tuple = Tuple::from(vec![Field::from("extra"), Field::from("last_seen"), Field::Int(0)]);
        let key = def.key_of(&tuple).unwrap();
        assert_eq!(key, vec![Field::from("extra"), Field::from("last_seen")]);
    }

    #[test]
    fn test_update_op_field() {
        assert_eq!(UpdateOp::Add { field: 1, delta: 5 }.field(), 1);
        assert_eq!(UpdateOp::Assign { field: 2, value: Field::Int(0) }.field(), 2);
    }
}
