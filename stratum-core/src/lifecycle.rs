//! Tier lifecycle state machine.
//!
//! ```text
//! Created ─── init ──→ Initialized ─── release ──→ Released
//!    └──────────────── release ───────────────────────↗
//! ```
//!
//! Transitions are driven by a provider. Using a tier outside the
//! `Initialized` state is a programming error and panics.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::StorageError;
use crate::TierId;

/// Lifecycle state of a caching tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TierState {
    /// Allocated but storage not yet opened.
    Created,
    /// Storage open, operations permitted.
    Initialized,
    /// Storage torn down, the tier is unusable.
    Released,
}

impl TierState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TierState::Created => "created",
            TierState::Initialized => "initialized",
            TierState::Released => "released",
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TierState::Created => 0,
            TierState::Initialized => 1,
            TierState::Released => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TierState::Created,
            1 => TierState::Initialized,
            _ => TierState::Released,
        }
    }
}

impl fmt::Display for TierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lock-free cell holding a `TierState`.
#[derive(Debug)]
pub struct AtomicTierState(AtomicU8);

impl AtomicTierState {
    pub fn new(state: TierState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn load(&self) -> TierState {
        TierState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns the actual state on mismatch.
    pub fn transition(&self, from: TierState, to: TierState) -> Result<(), TierState> {
        self.0
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(TierState::from_u8)
    }

    /// Unconditionally set the state, returning the previous one.
    pub fn replace(&self, state: TierState) -> TierState {
        TierState::from_u8(self.0.swap(state.as_u8(), Ordering::AcqRel))
    }
}

/// Type-erased lifecycle handle a provider keeps for each tier it creates.
pub trait ManagedTier: Send + Sync {
    /// Identity of the tier.
    fn tier_id(&self) -> TierId;

    /// Current lifecycle state.
    fn state(&self) -> TierState;

    /// Open storage handles and move `Created → Initialized`.
    ///
    /// # Panics
    ///
    /// Panics if the tier is not in the `Created` state.
    fn open(&self) -> Result<(), StorageError>;

    /// Tear down storage and move to `Released`.
    ///
    /// # Panics
    ///
    /// Panics if the tier was already released.
    fn close(&self) -> Result<(), StorageError>;
}
