//! The socket lock
//!
//! Every packet, primitive and timer expiry of a socket runs under this lock.
//! Callers name the purpose of each acquisition. With `lock_tracking` the lock
//! remembers its recent owners and warns when waiting for it or holding it
//! takes 1 ms or more.

use std::ops::{Deref, DerefMut};
use std::sync::{PoisonError, TryLockError};

use portable_atomic::{AtomicU64, Ordering};

#[cfg(feature = "lock_tracking")]
use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

#[cfg(feature = "lock_tracking")]
const MAX_LOCK_OWNERS: usize = 20;
#[cfg(feature = "lock_tracking")]
const SLOW_LOCK: Duration = Duration::from_millis(1);

struct Slot<T> {
    #[cfg(feature = "lock_tracking")]
    owners: VecDeque<(&'static str, Duration)>,
    value: T,
}

pub struct Mutex<T> {
    slot: std::sync::Mutex<Slot<T>>,
    refused: AtomicU64,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Mutex {
            slot: std::sync::Mutex::new(Slot {
                #[cfg(feature = "lock_tracking")]
                owners: VecDeque::with_capacity(MAX_LOCK_OWNERS),
                value,
            }),
            refused: AtomicU64::new(0),
        }
    }

    /// Blocks until the lock is free. A panic of an earlier owner does not
    /// poison the socket.
    pub fn lock(&self, purpose: &'static str) -> MutexGuard<'_, T> {
        #[cfg(feature = "lock_tracking")]
        let asked = Instant::now();

        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);

        #[cfg(feature = "lock_tracking")]
        {
            let waited = asked.elapsed();
            if waited >= SLOW_LOCK {
                log::warn!(
                    "waited {:?} for the socket lock ({}), recent owners: {:?}",
                    waited,
                    purpose,
                    slot.owners
                );
            }
        }

        MutexGuard::new(slot, purpose)
    }

    /// Takes the lock only if nobody holds it. Refusals are counted.
    pub fn try_lock(&self, purpose: &'static str) -> Option<MutexGuard<'_, T>> {
        let slot = match self.slot.try_lock() {
            Ok(slot) => slot,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.refused.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        Some(MutexGuard::new(slot, purpose))
    }

    /// Number of `try_lock` calls that found the lock taken
    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("refused", &self.refused())
            .finish_non_exhaustive()
    }
}

pub struct MutexGuard<'a, T> {
    slot: std::sync::MutexGuard<'a, Slot<T>>,
    #[cfg(feature = "lock_tracking")]
    taken: Instant,
    #[cfg(feature = "lock_tracking")]
    purpose: &'static str,
}

impl<'a, T> MutexGuard<'a, T> {
    #[cfg_attr(not(feature = "lock_tracking"), allow(unused_variables))]
    fn new(slot: std::sync::MutexGuard<'a, Slot<T>>, purpose: &'static str) -> Self {
        MutexGuard {
            slot,
            #[cfg(feature = "lock_tracking")]
            taken: Instant::now(),
            #[cfg(feature = "lock_tracking")]
            purpose,
        }
    }
}

#[cfg(feature = "lock_tracking")]
impl<'a, T> Drop for MutexGuard<'a, T> {
    fn drop(&mut self) {
        let held = self.taken.elapsed();
        if held >= SLOW_LOCK {
            log::warn!("socket lock held {:?} for {}", held, self.purpose);
        }

        let owners = &mut self.slot.owners;
        if owners.len() == MAX_LOCK_OWNERS {
            owners.pop_back();
        }
        owners.push_front((self.purpose, held));
    }
}

impl<'a, T> Deref for MutexGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.slot.value
    }
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.slot.value
    }
}
