//! Server-side procedures the adapters call through
//! [`TupleStore::call`](crate::TupleStore::call).
//!
//! Some protocol steps must be indivisible but span more than one row or mix
//! a read with a conditional write. A remote store runs these as stored
//! procedures; [`MemoryTupleStore`](crate::MemoryTupleStore) registers the
//! Rust equivalents below at construction.
//!
//! For a Tarantool-style server the matching Lua looks like:
//!
//! ```lua
//! function tuplekit.drain_prefix(space, ...)
//!     local rows = box.space[space]:select({...})
//!     for _, row in ipairs(rows) do
//!         box.space[space]:delete(primary_key_of(row))
//!     end
//!     return rows
//! end
//!
//! function tuplekit.replace_if_expired(space, now, ...)
//!     local row = box.space[space]:get(primary_key_of({...}))
//!     if row ~= nil and (row[EXPIRE] == 0 or row[EXPIRE] > now) then
//!         return {}
//!     end
//!     return { box.space[space]:replace({...}) }
//! end
//! ```

use std::sync::Arc;

use crate::{
    error::{StorageError, StorageResult},
    expiry,
    memory::Spaces,
    types::{Field, SpaceId, Tuple},
};

/// Atomically removes and returns every row whose primary key starts with
/// the given prefix.
///
/// Arguments: `[space, prefix_part...]`.
pub const DRAIN_PREFIX: &str = "tuplekit.drain_prefix";

/// Atomically writes a tuple unless a live row already holds its key.
///
/// Arguments: `[space, now, tuple_field...]`. Returns `[tuple]` when the
/// write happened and an empty result when a live row blocked it. In spaces
/// without an expire field every existing row counts as live.
pub const REPLACE_IF_EXPIRED: &str = "tuplekit.replace_if_expired";

/// A procedure body. Runs with exclusive access to every space, so whatever
/// it does is atomic with respect to all other store operations.
pub type Procedure = Arc<dyn Fn(&mut Spaces, &[Field]) -> StorageResult<Vec<Tuple>> + Send + Sync>;

/// Procedures installed on every [`MemoryTupleStore`](crate::MemoryTupleStore).
pub(crate) fn builtin() -> Vec<(&'static str, Procedure)> {
    vec![
        (DRAIN_PREFIX, Arc::new(drain_prefix) as Procedure),
        (REPLACE_IF_EXPIRED, Arc::new(replace_if_expired) as Procedure),
    ]
}

fn drain_prefix(spaces: &mut Spaces, args: &[Field]) -> StorageResult<Vec<Tuple>> {
    let (space, prefix) = split_space(DRAIN_PREFIX, args)?;
    Ok(spaces.space_mut(space)?.remove_prefix(prefix))
}

fn replace_if_expired(spaces: &mut Spaces, args: &[Field]) -> StorageResult<Vec<Tuple>> {
    let (space, rest) = split_space(REPLACE_IF_EXPIRED, args)?;
    let (now, fields) = match rest.split_first() {
        Some((Field::Int(now), fields)) => (*now, fields),
        _ => return Err(bad_args(REPLACE_IF_EXPIRED, "second argument must be the current time")),
    };

    let data = spaces.space_mut(space)?;
    let tuple = Tuple::from(fields.to_vec());
    let key = data.def().key_of(&tuple)?;

    let blocked = data.get(&key).is_some_and(|existing| !data.is_expired(existing, now));
    if blocked {
        return Ok(Vec::new());
    }

    data.put(tuple.clone())?;
    Ok(vec![tuple])
}

/// Splits the leading space-id argument off `args`.
fn split_space<'a>(name: &str, args: &'a [Field]) -> StorageResult<(SpaceId, &'a [Field])> {
    match args.split_first() {
        Some((Field::Int(raw), rest)) => {
            let id = u32::try_from(*raw)
                .map_err(|_| bad_args(name, "space id out of range"))?;
            Ok((SpaceId::from(id), rest))
        },
        _ => Err(bad_args(name, "first argument must be a space id")),
    }
}

fn bad_args(name: &str, reason: &str) -> StorageError {
    StorageError::invalid_tuple(format!("{name}: {reason}"))
}

/// Argument vector for [`REPLACE_IF_EXPIRED`].
#[must_use]
pub fn replace_if_expired_args(space: SpaceId, tuple: &Tuple) -> Vec<Field> {
    let mut args = Vec::with_capacity(tuple.len() + 2);
    args.push(Field::Int(i64::from(u32::from(space))));
    args.push(Field::Int(expiry::unix_timestamp()));
    args.extend(tuple.fields().iter().cloned());
    args
}

/// Argument vector for [`DRAIN_PREFIX`].
#[must_use]
pub fn drain_prefix_args(space: SpaceId, prefix: &[Field]) -> Vec<Field> {
    let mut args = Vec::with_capacity(prefix.len() + 1);
    args.push(Field::Int(i64::from(u32::from(space))));
    args.extend(prefix.iter().cloned());
    args
}
