//! Per-key sync exclusion.
//!
//! At most one sync may run for a given `(location, cache path)` pair. A
//! second request for a held key is rejected immediately instead of queueing.
//! Resetting the whole cache takes an exclusive lease that excludes every
//! per-key sync.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Lock key: remote location plus cache directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub location: String,
    pub cache_path: PathBuf,
}

impl LockKey {
    pub fn new(location: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            cache_path: cache_path.into(),
        }
    }
}

/// Table of per-key mutexes.
///
/// Every per-key lease also holds a shared guard on `gate`; the exclusive
/// side is only available while no key is held.
#[derive(Debug, Default)]
pub struct SyncLocks {
    slots: Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
    gate: Arc<RwLock<()>>,
}

/// Held while a sync runs; dropping it (including during unwinding) releases
/// the key.
#[derive(Debug)]
pub struct SyncLease {
    key: LockKey,
    _guard: OwnedMutexGuard<()>,
    _gate: OwnedRwLockReadGuard<()>,
}

/// Excludes every per-key sync while held.
#[derive(Debug)]
pub struct ExclusiveLease {
    _gate: OwnedRwLockWriteGuard<()>,
}

impl SyncLease {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &LockKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Acquire the key without waiting. `None` means another sync holds it.
    pub fn try_acquire(&self, location: &str, cache_path: &Path) -> Option<SyncLease> {
        let gate = Arc::clone(&self.gate).try_read_owned().ok()?;
        let key = LockKey::new(location, cache_path);
        let guard = self.slot(&key).try_lock_owned().ok()?;
        Some(SyncLease {
            key,
            _guard: guard,
            _gate: gate,
        })
    }

    /// Acquire every key at once. `None` while any sync is running.
    pub fn try_acquire_all(&self) -> Option<ExclusiveLease> {
        let gate = Arc::clone(&self.gate).try_write_owned().ok()?;
        Some(ExclusiveLease { _gate: gate })
    }

    /// Drop the key's slot if nothing holds or waits on it.
    pub fn prune(&self, location: &str, cache_path: &Path) {
        let key = LockKey::new(location, cache_path);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.get(&key).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(&key);
        }
    }

    /// Drop every idle slot.
    pub fn prune_idle(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    /// Number of keys currently tracked.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether a sync currently holds the key.
    pub fn is_held(&self, location: &str, cache_path: &Path) -> bool {
        let key = LockKey::new(location, cache_path);
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let held = slots.get(&key).is_some_and(|slot| slot.try_lock().is_err());
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_rejected_until_release() {
        let locks = SyncLocks::new();
        let path = Path::new("/cache/kb");

        let lease = locks.try_acquire("https://x/kb.git", path).unwrap();
        assert!(locks.is_held("https://x/kb.git", path));
        assert!(locks.try_acquire("https://x/kb.git", path).is_none());

        drop(lease);
        assert!(!locks.is_held("https://x/kb.git", path));
        assert!(locks.try_acquire("https://x/kb.git", path).is_some());
    }

    #[test]
    fn test_distinct_keys_are_independent() {
        let locks = SyncLocks::new();
        let _a = locks.try_acquire("https://x/a.git", Path::new("/cache/a")).unwrap();
        assert!(locks
            .try_acquire("https://x/b.git", Path::new("/cache/b"))
            .is_some());
        // Same location, different cache directory.
        assert!(locks
            .try_acquire("https://x/a.git", Path::new("/cache/a2"))
            .is_some());
    }

    #[test]
    fn test_released_on_panic() {
        let locks = Arc::new(SyncLocks::new());
        let inner = Arc::clone(&locks);
        let result = std::thread::spawn(move || {
            let _lease = inner.try_acquire("loc", Path::new("/p")).unwrap();
            panic!("sync blew up");
        })
        .join();
        assert!(result.is_err());
        assert!(locks.try_acquire("loc", Path::new("/p")).is_some());
    }

    #[test]
    fn test_prune_drops_idle_slot_only() {
        let locks = SyncLocks::new();
        let path = Path::new("/cache/kb");

        let lease = locks.try_acquire("loc", path).unwrap();
        locks.prune("loc", path);
        assert_eq!(locks.slot_count(), 1);
        assert!(locks.try_acquire("loc", path).is_none());

        drop(lease);
        locks.prune("loc", path);
        assert_eq!(locks.slot_count(), 0);
        assert!(locks.try_acquire("loc", path).is_some());
    }

    #[test]
    fn test_prune_idle_keeps_held_keys() {
        let locks = SyncLocks::new();
        let _held = locks.try_acquire("a", Path::new("/cache/a")).unwrap();
        drop(locks.try_acquire("b", Path::new("/cache/b")));
        drop(locks.try_acquire("c", Path::new("/cache/c")));
        assert_eq!(locks.slot_count(), 3);

        locks.prune_idle();
        assert_eq!(locks.slot_count(), 1);
        assert!(locks.is_held("a", Path::new("/cache/a")));
    }

    #[test]
    fn test_exclusive_lease_excludes_every_key() {
        let locks = SyncLocks::new();

        let lease = locks.try_acquire("a", Path::new("/cache/a")).unwrap();
        assert!(locks.try_acquire_all().is_none());
        drop(lease);

        let all = locks.try_acquire_all().unwrap();
        assert!(locks.try_acquire("a", Path::new("/cache/a")).is_none());
        assert!(locks.try_acquire("new", Path::new("/cache/new")).is_none());
        drop(all);
        assert!(locks.try_acquire("new", Path::new("/cache/new")).is_some());
    }
}
