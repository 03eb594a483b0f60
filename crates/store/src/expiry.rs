//! `expire_at` column helpers.
//!
//! Rows carry an absolute expiry as whole seconds since the Unix epoch.
//! [`NEVER`] (zero) marks a row that never expires. A row is expired once
//! the current second reaches its `expire_at`.

use std::time::Duration;

use chrono::Utc;

/// `expire_at` value for rows that never expire.
pub const NEVER: i64 = 0;

/// Current wall-clock time in whole seconds since the Unix epoch.
#[must_use]
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Absolute expiry for a row written at `now` that should live for `ttl`.
///
/// A zero TTL yields a row that is already expired. Fractional seconds round
/// up. Saturates instead of overflowing on absurd TTLs.
#[must_use]
pub fn expire_at(now: i64, ttl: Duration) -> i64 {
    let mut secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    if ttl.subsec_nanos() > 0 {
        secs = secs.saturating_add(1);
    }
    now.saturating_add(secs)
}

/// Whether a row with the given `expire_at` is expired at `now`.
#[must_use]
pub fn is_expired(expire_at: i64, now: i64) -> bool {
    expire_at != NEVER && expire_at <= now
}
