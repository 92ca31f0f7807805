//! Named lock registry.
//!
//! Each shared structure (an enumeration's collection, a memory instance's
//! samplers) is guarded by exactly one `NamedLock` handed out by the
//! `LockRegistry` owned by the process-wide [`PalContext`](crate::context::PalContext).
//! The registry only tracks names and acquisition statistics; it never holds
//! the guarded data itself, so unrelated subsystems never contend.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::{debug, warn};

/// Acquisition counters for one named lock.
#[derive(Debug, Default)]
pub struct LockStats {
    acquisitions: AtomicU64,
    contended: AtomicU64,
}

/// Snapshot of a lock's statistics.
#[derive(Debug, Clone, Serialize)]
pub struct LockInfo {
    pub name: String,
    pub acquisitions: u64,
    pub contended: u64,
}

/// A mutex with a registry name and acquisition statistics.
pub struct NamedLock<T> {
    name: Arc<str>,
    inner: Arc<Mutex<T>>,
    stats: Arc<LockStats>,
}

impl<T> Clone for NamedLock<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            inner: self.inner.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl<T> NamedLock<T> {
    /// Creates a lock outside any registry (tests, standalone use).
    pub fn unregistered(name: &str, value: T) -> Self {
        Self {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(value)),
            stats: Arc::new(LockStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Acquires the lock, blocking until available.
    ///
    /// A poisoned lock is recovered: the panicking writer could only have
    /// left a partially updated sample behind, and readers prefer that to
    /// losing the subsystem.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.stats.acquisitions.fetch_add(1, Ordering::Relaxed);
        match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.stats.contended.fetch_add(1, Ordering::Relaxed);
                self.inner.lock().unwrap_or_else(|poisoned| {
                    warn!("Lock '{}' was poisoned, recovering", self.name);
                    poisoned.into_inner()
                })
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                warn!("Lock '{}' was poisoned, recovering", self.name);
                poisoned.into_inner()
            }
        }
    }

    pub fn info(&self) -> LockInfo {
        LockInfo {
            name: self.name.to_string(),
            acquisitions: self.stats.acquisitions.load(Ordering::Relaxed),
            contended: self.stats.contended.load(Ordering::Relaxed),
        }
    }
}

/// Factory and directory of named locks.
#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<LockStats>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a lock named `name` guarding `value`.
    ///
    /// Locks sharing a name share statistics, which is what callers want
    /// when an enumeration is re-created after a configuration reload.
    pub fn create<T>(&self, name: &str, value: T) -> NamedLock<T> {
        let stats = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!("Registering lock '{}'", name);
                Arc::new(LockStats::default())
            })
            .clone();

        NamedLock {
            name: Arc::from(name),
            inner: Arc::new(Mutex::new(value)),
            stats,
        }
    }

    /// Number of distinct lock names registered.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Statistics for every registered lock, sorted by name.
    pub fn get_stats(&self) -> Vec<LockInfo> {
        let mut out: Vec<LockInfo> = self
            .locks
            .iter()
            .map(|entry| LockInfo {
                name: entry.key().clone(),
                acquisitions: entry.value().acquisitions.load(Ordering::Relaxed),
                contended: entry.value().contended.load(Ordering::Relaxed),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Drops all registrations. Existing locks keep working.
    pub fn clear(&self) {
        self.locks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_create_registers_name() {
        let registry = LockRegistry::new();
        let lock = registry.create("pal.memory", 0u64);
        assert_eq!(lock.name(), "pal.memory");
        assert_eq!(registry.len(), 1);

        *lock.lock() += 5;
        assert_eq!(*lock.lock(), 5);

        let stats = registry.get_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].acquisitions, 2);
    }

    #[test]
    fn test_same_name_shares_stats() {
        let registry = LockRegistry::new();
        let a = registry.create("pal.disk", ());
        let b = registry.create("pal.disk", ());
        drop(a.lock());
        drop(b.lock());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_stats()[0].acquisitions, 2);
    }

    #[test]
    fn test_poisoned_lock_recovers() {
        let lock = NamedLock::unregistered("poison", 1u32);
        let clone = lock.clone();
        let _ = thread::spawn(move || {
            let _guard = clone.lock();
            panic!("poison the lock");
        })
        .join();

        assert_eq!(*lock.lock(), 1);
    }
}
