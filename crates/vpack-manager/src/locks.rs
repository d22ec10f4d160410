//! Per-package exclusive locks.
//!
//! Every package path maps to one `tokio::sync::Mutex`. Operations on the
//! same package queue on that mutex; operations on different packages never
//! contend beyond a shard lock inside the map.
//!
//! # Growth
//!
//! An entry is created the first time a path is referenced. It is removed
//! only through [`PackageLocks::evict_if_idle`], which the manager calls
//! after closing a package. Without explicit closes the map grows with the
//! number of distinct package paths touched during the process lifetime.
//!
//! Keys are used exactly as given: two spellings of the same file (for
//! example relative and absolute) are two packages with two locks.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-package locks, each guarding a value of type `T`.
pub struct PackageLocks<T> {
    locks: DashMap<PathBuf, Arc<Mutex<T>>>,
}

impl<T: Default> PackageLocks<T> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// The lock for `package`, created on first reference.
    pub fn lock_for(&self, package: &Path) -> Arc<Mutex<T>> {
        if let Some(lock) = self.locks.get(package) {
            return Arc::clone(lock.value());
        }
        Arc::clone(self.locks.entry(package.to_path_buf()).or_default().value())
    }

    /// Wait until no other operation holds `package`, then take it.
    ///
    /// The lock is released when the guard is dropped, on every exit path.
    pub async fn acquire(&self, package: &Path) -> OwnedMutexGuard<T> {
        self.lock_for(package).lock_owned().await
    }
}

impl<T> PackageLocks<T> {
    /// The lock for `package` if one has been created.
    pub fn existing(&self, package: &Path) -> Option<Arc<Mutex<T>>> {
        self.locks.get(package).map(|lock| Arc::clone(lock.value()))
    }

    /// Remove the entry for `package` if nobody else holds a reference to
    /// its lock and `is_idle` accepts the guarded value.
    ///
    /// Runs under the map's shard write lock, so no new reference can be
    /// handed out while the check runs. Returns `true` if evicted.
    pub fn evict_if_idle(&self, package: &Path, is_idle: impl FnOnce(&T) -> bool) -> bool {
        self.locks
            .remove_if(package, |_, lock| {
                Arc::strong_count(lock) == 1
                    && lock.try_lock().map(|value| is_idle(&*value)).unwrap_or(false)
            })
            .is_some()
    }

    /// Clone out every registered lock. The map is not held while the
    /// caller awaits the returned locks.
    pub fn snapshot(&self) -> Vec<(PathBuf, Arc<Mutex<T>>)> {
        self.locks
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Number of registered package paths.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<T: Default> Default for PackageLocks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for PackageLocks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageLocks")
            .field("packages", &self.locks.len())
            .finish()
    }
}
