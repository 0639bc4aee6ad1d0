//! Expiration policy for newly created value holders.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::Timestamp;

/// How long a freshly created mapping stays valid.
///
/// The policy only computes the deadline stamped on a holder at creation
/// time; once created, a holder's deadline never moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExpiryPolicy {
    /// Mappings never expire on time alone.
    #[default]
    NoExpiry,
    /// Mappings expire a fixed duration after creation.
    TimeToLive(Duration),
}

impl ExpiryPolicy {
    /// Create a policy that never expires mappings.
    pub fn no_expiry() -> Self {
        Self::NoExpiry
    }

    /// Create a time-to-live policy.
    pub fn time_to_live(ttl: Duration) -> Self {
        Self::TimeToLive(ttl)
    }

    /// Deadline for a mapping created at `created_at`.
    ///
    /// Returns `None` when the mapping never expires, including when the
    /// TTL is too large to be represented as a timestamp.
    pub fn deadline_from(&self, created_at: Timestamp) -> Option<Timestamp> {
        match self {
            Self::NoExpiry => None,
            Self::TimeToLive(ttl) => chrono::Duration::from_std(*ttl)
                .ok()
                .and_then(|ttl| created_at.checked_add_signed(ttl)),
        }
    }
}
