//! Process-wide context.
//!
//! Created once at startup and shared by every enumeration. It carries the
//! effective configuration and the lock registry from which each
//! enumeration obtains the lock for its collection.

use std::sync::Arc;

use crate::config::Config;
use crate::locks::{LockInfo, LockRegistry, NamedLock};

pub struct PalContext {
    config: Config,
    locks: LockRegistry,
}

impl PalContext {
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            config,
            locks: LockRegistry::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    /// Shorthand for `locks().create(name, value)`.
    pub fn create_lock<T>(&self, name: &str, value: T) -> NamedLock<T> {
        self.locks.create(name, value)
    }

    pub fn lock_stats(&self) -> Vec<LockInfo> {
        self.locks.get_stats()
    }
}

impl Default for PalContext {
    fn default() -> Self {
        Self {
            config: Config::default(),
            locks: LockRegistry::new(),
        }
    }
}
