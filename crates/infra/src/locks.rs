//! Per-key locking for balance and serial mutations.
//!
//! A unit of work locks every key it touches at once, so two movements over
//! disjoint keys never wait on each other and overlapping ones are fully
//! serialized. Acquiring the whole set in one step means no lock ordering is
//! needed to stay deadlock-free.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use stockledger_inventory::BalanceKey;

use crate::error::{LedgerError, LedgerResult};

/// What a unit of work can lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    Balance(BalanceKey),
    Serial(String),
}

#[derive(Debug)]
pub struct KeyLocks<K> {
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

impl<K> Default for KeyLocks<K> {
    fn default() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> KeyLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every key is free, then take them all.
    ///
    /// Fails with `ConcurrentBalanceConflict` once `timeout` elapses; nothing
    /// is held in that case.
    pub fn acquire(
        &self,
        keys: impl IntoIterator<Item = K>,
        timeout: Duration,
    ) -> LedgerResult<KeyGuard<'_, K>> {
        let mut wanted: Vec<K> = Vec::new();
        for key in keys {
            if !wanted.contains(&key) {
                wanted.push(key);
            }
        }

        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(|_| LedgerError::poisoned("key"))?;
        while wanted.iter().any(|k| held.contains(k)) {
            let now = Instant::now();
            if now >= deadline {
                return Err(LedgerError::ConcurrentBalanceConflict(format!(
                    "timed out after {}ms waiting for {} key(s)",
                    timeout.as_millis(),
                    wanted.len()
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| LedgerError::poisoned("key"))?;
            held = guard;
        }
        held.extend(wanted.iter().cloned());

        Ok(KeyGuard {
            locks: self,
            keys: wanted,
        })
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

/// Releases its keys on drop.
#[derive(Debug)]
pub struct KeyGuard<'a, K: Clone + Eq + Hash> {
    locks: &'a KeyLocks<K>,
    keys: Vec<K>,
}

impl<K: Clone + Eq + Hash> KeyGuard<'_, K> {
    pub fn covers(&self, key: &K) -> bool {
        self.keys.contains(key)
    }

    pub fn keys(&self) -> &[K] {
        &self.keys
    }
}

impl<K: Clone + Eq + Hash> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        let mut held = match self.locks.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.locks.released.notify_all();
    }
}
