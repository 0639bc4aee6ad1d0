//! Striped per-key locks with a tier-wide gate.
//!
//! ```text
//! per-key op:  gate (shared, recursive) ─→ stripe[hash(key) & mask]
//! sweep:       gate (shared, recursive) ─→ per-key op for each key
//! clear:       gate (exclusive)
//! ```
//!
//! Each thread records the stripes it holds so that a loader, action or
//! listener calling back into the same tier on a held stripe panics instead
//! of deadlocking.

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cell::RefCell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(lock id, stripe)` pairs held by the current thread.
    static HELD_STRIPES: RefCell<Vec<(u64, usize)>> = const { RefCell::new(Vec::new()) };
}

/// Array of mutexes indexed by key hash, plus a gate for whole-tier operations.
pub(crate) struct StripedLock {
    id: u64,
    gate: RwLock<()>,
    stripes: Box<[Mutex<()>]>,
    mask: usize,
    hasher: RandomState,
}

impl StripedLock {
    /// Create a lock with `concurrency` stripes, rounded up to a power of two.
    pub(crate) fn new(concurrency: usize) -> Self {
        let count = concurrency.max(1).next_power_of_two();
        Self {
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
            gate: RwLock::new(()),
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
            mask: count - 1,
            hasher: RandomState::new(),
        }
    }

    pub(crate) fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    pub(crate) fn stripe_for<K: Hash>(&self, key: &K) -> usize {
        (self.hasher.hash_one(key) as usize) & self.mask
    }

    /// Lock the stripe guarding `key`.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds that stripe.
    pub(crate) fn lock_key<K: Hash>(&self, key: &K) -> StripeGuard<'_> {
        let stripe = self.stripe_for(key);
        let entry = (self.id, stripe);
        if HELD_STRIPES.with(|held| held.borrow().contains(&entry)) {
            panic!("reentrant access to a caching tier from inside its own critical section (stripe {stripe})");
        }

        let gate = self.gate.read_recursive();
        let guard = self.stripes[stripe].lock();
        HELD_STRIPES.with(|held| held.borrow_mut().push(entry));

        StripeGuard {
            _stripe: guard,
            _gate: gate,
            lock_id: self.id,
            stripe,
        }
    }

    /// Take a shared claim on the gate without locking any stripe.
    ///
    /// Keeps `clear` and `close` out while a multi-key sweep runs.
    pub(crate) fn lock_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.gate.read_recursive()
    }

    /// Take the gate exclusively, waiting for every per-key section to finish.
    ///
    /// # Panics
    ///
    /// Panics if the current thread holds any stripe of this lock.
    pub(crate) fn lock_all(&self) -> RwLockWriteGuard<'_, ()> {
        if self.held_by_current_thread() {
            panic!("tier-wide operation attempted from inside a per-key critical section");
        }
        self.gate.write()
    }

    /// Whether the current thread holds any stripe of this lock.
    pub(crate) fn held_by_current_thread(&self) -> bool {
        HELD_STRIPES.with(|held| held.borrow().iter().any(|(id, _)| *id == self.id))
    }
}

/// Holds one stripe and a shared claim on the gate.
///
/// The stripe is released before the gate.
pub(crate) struct StripeGuard<'a> {
    _stripe: MutexGuard<'a, ()>,
    _gate: RwLockReadGuard<'a, ()>,
    lock_id: u64,
    stripe: usize,
}

impl Drop for StripeGuard<'_> {
    fn drop(&mut self) {
        let entry = (self.lock_id, self.stripe);
        let _ = HELD_STRIPES.try_with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|e| *e == entry) {
                held.swap_remove(pos);
            }
        });
    }
}
