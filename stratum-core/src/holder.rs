//! Value holders: a stored value plus its timing metadata.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use crate::expiry::ExpiryPolicy;
use crate::identity::timestamp_from_millis;
use crate::Timestamp;

/// A stored value together with creation, access and expiry timestamps.
///
/// Holders are immutable once created except for the last-access stamp,
/// which only ever moves forward. Tiers hand them out as
/// `Arc<ValueHolder<V>>` so a holder returned to one caller is the same
/// object another caller observes.
///
/// # Expiry
///
/// A holder with `expires_at = Some(t)` is expired for every `now >= t`.
/// An expired holder must never be returned to a caller as valid.
pub struct ValueHolder<V> {
    value: V,
    created_at: Timestamp,
    expires_at: Option<Timestamp>,
    last_accessed_ms: AtomicI64,
}

impl<V> ValueHolder<V> {
    /// Create a holder that never expires on time alone.
    pub fn new(value: V, created_at: Timestamp) -> Self {
        Self::with_expiry(value, created_at, None)
    }

    /// Create a holder with an explicit deadline.
    pub fn with_expiry(value: V, created_at: Timestamp, expires_at: Option<Timestamp>) -> Self {
        Self {
            value,
            created_at,
            expires_at,
            last_accessed_ms: AtomicI64::new(created_at.timestamp_millis()),
        }
    }

    /// Create a holder whose deadline is derived from an expiry policy.
    pub fn with_policy(value: V, created_at: Timestamp, policy: &ExpiryPolicy) -> Self {
        Self::with_expiry(value, created_at, policy.deadline_from(created_at))
    }

    /// Get a reference to the stored value.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Consume the holder and return the stored value.
    pub fn into_value(self) -> V {
        self.value
    }

    /// When this holder was created.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// The expiry deadline, or `None` if the holder never expires.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.expires_at
    }

    /// When this holder was last read through a tier (millisecond precision).
    pub fn last_accessed_at(&self) -> Timestamp {
        timestamp_from_millis(self.last_accessed_ms.load(Ordering::Acquire))
    }

    /// Check if the holder has expired as of `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }

    /// Calculate remaining duration until expiry.
    ///
    /// Returns `None` if already expired, `Some(Duration::MAX)` if the
    /// holder never expires.
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        match self.expires_at {
            None => Some(Duration::MAX),
            Some(deadline) if now >= deadline => None,
            Some(deadline) => (deadline - now).to_std().ok(),
        }
    }

    /// Record a successful read at `now`. Never moves the stamp backwards.
    pub fn touch(&self, now: Timestamp) {
        self.last_accessed_ms
            .fetch_max(now.timestamp_millis(), Ordering::AcqRel);
    }
}

impl<V: Clone> Clone for ValueHolder<V> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_accessed_ms: AtomicI64::new(self.last_accessed_ms.load(Ordering::Acquire)),
        }
    }
}

/// Holders compare by value and lifetime; the access stamp is bookkeeping.
impl<V: PartialEq> PartialEq for ValueHolder<V> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.created_at == other.created_at
            && self.expires_at == other.expires_at
    }
}

impl<V: fmt::Debug> fmt::Debug for ValueHolder<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueHolder")
            .field("value", &self.value)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("last_accessed_at", &self.last_accessed_at())
            .finish()
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// A holder is expired exactly when `now` has reached its deadline.
        #[test]
        fn prop_expired_iff_deadline_reached(
            created_ms in 0i64..4_000_000_000_000,
            ttl_ms in 0i64..86_400_000,
            probe_ms in -86_400_000i64..172_800_000,
        ) {
            let created = Utc.timestamp_millis_opt(created_ms).unwrap();
            let deadline = created + chrono::Duration::milliseconds(ttl_ms);
            let now = created + chrono::Duration::milliseconds(probe_ms);
            let holder = ValueHolder::with_expiry((), created, Some(deadline));

            prop_assert_eq!(holder.is_expired(now), now >= deadline);
            prop_assert_eq!(holder.remaining(now).is_none(), now >= deadline);
        }

        /// The access stamp is the maximum of every touch.
        #[test]
        fn prop_touch_keeps_maximum(offsets in proptest::collection::vec(0i64..1_000_000, 1..20)) {
            let created = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
            let holder = ValueHolder::new((), created);
            for offset in &offsets {
                holder.touch(created + chrono::Duration::milliseconds(*offset));
            }
            let max = offsets.iter().copied().max().unwrap_or(0);
            prop_assert_eq!(
                holder.last_accessed_at().timestamp_millis(),
                created.timestamp_millis() + max
            );
        }
    }
}
