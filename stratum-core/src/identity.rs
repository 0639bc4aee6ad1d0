//! Identity types for caching tiers

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Tier identifier using UUIDv7 for timestamp-sortable IDs.
/// Providers key their registries by this value.
pub type TierId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 TierId (timestamp-sortable).
pub fn new_tier_id() -> TierId {
    Uuid::now_v7()
}

/// Convert a millisecond count back into a timestamp.
///
/// Out-of-range values clamp to the representable bounds instead of failing,
/// since they only ever come from our own encoded records.
pub fn timestamp_from_millis(millis: i64) -> Timestamp {
    DateTime::from_timestamp_millis(millis).unwrap_or(if millis < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}
