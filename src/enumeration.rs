//! Entity collections and the enumeration contract.
//!
//! An enumeration owns one [`EntityCollection`] behind a [`NamedLock`] and
//! reconciles it against what the OS currently reports:
//!
//! 1. every instance is marked offline,
//! 2. the dependency is asked for the current entity list,
//! 3. known keys come back online (and are updated on request), new keys are
//!    constructed and inserted,
//! 4. keys that were not reported stay offline or are purged, depending on
//!    the resource's [`PurgePolicy`].
//!
//! The synthetic `_Total` instance is pinned outside the keyed list and is
//! neither counted by `size()` nor visited by `iter()`.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::sync::MutexGuard;
use tracing::{debug, trace, warn};

use crate::entity::{EntityInstance, TOTAL_INSTANCE_NAME};
use crate::error::{PalError, Result};
use crate::locks::NamedLock;

/// What happens to instances whose entity was not reported in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgePolicy {
    /// Keep them in the collection, offline. Preserves enumeration order.
    Retain,
    /// Remove them at the end of the pass.
    Purge,
}

/// How identity keys are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyNormalization {
    Exact,
    CaseInsensitive,
}

impl KeyNormalization {
    pub fn normalize(&self, key: &str) -> String {
        match self {
            KeyNormalization::Exact => key.to_string(),
            KeyNormalization::CaseInsensitive => key.to_lowercase(),
        }
    }
}

/// Insertion-ordered, keyed set of instances with an optional Total row.
pub struct EntityCollection<T: EntityInstance> {
    instances: Vec<T>,
    index: AHashMap<String, usize>,
    total: Option<T>,
    normalization: KeyNormalization,
}

impl<T: EntityInstance> Default for EntityCollection<T> {
    fn default() -> Self {
        Self::new(KeyNormalization::Exact)
    }
}

impl<T: EntityInstance> EntityCollection<T> {
    pub fn new(normalization: KeyNormalization) -> Self {
        Self {
            instances: Vec::new(),
            index: AHashMap::new(),
            total: None,
            normalization,
        }
    }

    pub fn normalization(&self) -> KeyNormalization {
        self.normalization
    }

    /// Inserts `instance` under its id.
    ///
    /// If an instance with the same normalized key exists it is replaced in
    /// place and keeps its position; otherwise the instance is appended.
    pub fn add_instance(&mut self, instance: T) -> &mut T {
        let key = self.normalization.normalize(instance.id());
        let pos = match self.index.get(&key) {
            Some(&pos) => {
                self.instances[pos] = instance;
                pos
            }
            None => {
                self.instances.push(instance);
                let pos = self.instances.len() - 1;
                self.index.insert(key, pos);
                pos
            }
        };
        &mut self.instances[pos]
    }

    pub fn set_total_instance(&mut self, instance: T) {
        self.total = Some(instance);
    }

    pub fn total_instance(&self) -> Option<&T> {
        self.total.as_ref()
    }

    pub fn total_instance_mut(&mut self) -> Option<&mut T> {
        self.total.as_mut()
    }

    /// Instance with the (normalized) key, excluding Total.
    pub fn get_instance(&self, key: &str) -> Option<&T> {
        let pos = *self.index.get(&self.normalization.normalize(key))?;
        self.instances.get(pos)
    }

    pub fn get_instance_mut(&mut self, key: &str) -> Option<&mut T> {
        let pos = *self.index.get(&self.normalization.normalize(key))?;
        self.instances.get_mut(pos)
    }

    /// Instance at `pos` in insertion order.
    pub fn get_instance_at(&self, pos: usize) -> Result<&T> {
        self.instances
            .get(pos)
            .ok_or_else(|| PalError::illegal_index("instance", pos, self.instances.len()))
    }

    /// Looks up `key` among the items, falling back to the Total row when
    /// `key` is `_Total`.
    pub fn find(&self, key: &str) -> Option<&T> {
        if let Some(found) = self.get_instance(key) {
            return Some(found);
        }
        self.total
            .as_ref()
            .filter(|_| key == TOTAL_INSTANCE_NAME)
    }

    pub fn find_by<P>(&self, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        self.instances.iter().find(|i| predicate(i))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(&self.normalization.normalize(key))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.instances.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.instances.iter_mut()
    }

    /// Number of items, Total excluded.
    pub fn size(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Removes and cleans up the instance with `key`.
    pub fn remove_instance(&mut self, key: &str) -> Option<T> {
        let pos = self.index.remove(&self.normalization.normalize(key))?;
        let mut removed = self.instances.remove(pos);
        removed.clean_up();
        self.reindex();
        Some(removed)
    }

    /// Marks every item offline. Total is left alone.
    pub fn mark_all_offline(&mut self) {
        for instance in &mut self.instances {
            instance.set_online(false);
        }
    }

    /// Removes offline items and returns their ids.
    pub fn purge_offline(&mut self) -> Vec<String> {
        if self.instances.iter().all(|i| i.is_online()) {
            return Vec::new();
        }

        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.instances.len());
        for mut instance in self.instances.drain(..) {
            if instance.is_online() {
                kept.push(instance);
            } else {
                instance.clean_up();
                removed.push(instance.id().to_string());
            }
        }
        self.instances = kept;
        self.reindex();
        removed
    }

    /// Calls `update()` on every item and on Total, applying the
    /// failure policy per instance.
    pub fn update_instances(&mut self) {
        for instance in &mut self.instances {
            apply_update(instance);
        }
        if let Some(total) = self.total.as_mut() {
            apply_update(total);
        }
    }

    /// Cleans up and drops every instance, Total included.
    pub fn clean_up(&mut self) {
        for instance in &mut self.instances {
            instance.clean_up();
        }
        if let Some(total) = self.total.as_mut() {
            total.clean_up();
        }
        self.instances.clear();
        self.index.clear();
        self.total = None;
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (pos, instance) in self.instances.iter().enumerate() {
            self.index
                .insert(self.normalization.normalize(instance.id()), pos);
        }
    }
}

impl<'a, T: EntityInstance> IntoIterator for &'a EntityCollection<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Runs `instance.update()` and maps the outcome onto its status flags.
///
/// A vanished entity goes offline. Any other failure is logged, the sample
/// is skipped and the previous data stays in place.
pub fn apply_update<T: EntityInstance>(instance: &mut T) {
    match instance.update() {
        Ok(()) => {
            trace!("Updated instance '{}'", instance.id());
            instance.base_mut().set_unexpected_error(false);
        }
        Err(e) if e.is_not_found() => {
            debug!("Instance '{}' went away: {}", instance.id(), e);
            instance.set_online(false);
        }
        Err(e) => {
            warn!("Failed to update instance '{}': {}", instance.id(), e);
            instance.base_mut().set_unexpected_error(true);
        }
    }
}

/// Keys added and removed by one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Reconciles `collection` against one discovery pass.
///
/// `discovered` yields `(key, data)` pairs. Known keys are brought online and
/// handed their fresh data through `refresh`; unknown keys are built with
/// `create`, which may decline by returning `None`. When `update_instances`
/// is set, every online item and the Total row are updated afterwards.
pub fn reconcile<T, D, I, R, C>(
    collection: &mut EntityCollection<T>,
    discovered: I,
    policy: PurgePolicy,
    update_instances: bool,
    mut refresh: R,
    mut create: C,
) -> Reconciled
where
    T: EntityInstance,
    I: IntoIterator<Item = (String, D)>,
    R: FnMut(&mut T, D),
    C: FnMut(&str, D) -> Option<T>,
{
    let mut report = Reconciled::default();
    collection.mark_all_offline();

    for (key, data) in discovered {
        if let Some(existing) = collection.get_instance_mut(&key) {
            existing.set_online(true);
            refresh(existing, data);
            continue;
        }
        if let Some(mut instance) = create(&key, data) {
            instance.set_online(true);
            trace!("Discovered new instance '{}'", key);
            collection.add_instance(instance);
            report.added.push(key);
        }
    }

    if update_instances {
        for instance in collection.iter_mut().filter(|i| i.is_online()) {
            apply_update(instance);
        }
        if let Some(total) = collection.total_instance_mut() {
            apply_update(total);
        }
    }

    if policy == PurgePolicy::Purge {
        report.removed = collection.purge_offline();
    }

    if !report.added.is_empty() || !report.removed.is_empty() {
        debug!(
            "Reconciled collection: {} added, {} removed, {} total",
            report.added.len(),
            report.removed.len(),
            collection.size()
        );
    }
    report
}

/// The contract every resource enumeration fulfils.
pub trait Enumeration: Send + Sync {
    type Instance: EntityInstance;

    /// The lock guarding this enumeration's collection.
    fn collection(&self) -> &NamedLock<EntityCollection<Self::Instance>>;

    /// One reconciliation pass against a collection the caller already holds.
    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<Self::Instance>,
        update_instances: bool,
    ) -> Result<()>;

    /// First discovery pass.
    fn init(&self) -> Result<()> {
        self.update(false)
    }

    fn update(&self, update_instances: bool) -> Result<()> {
        let mut guard = self.collection().lock();
        self.update_no_lock(&mut guard, update_instances)
    }

    /// Holds the collection lock for a consistent multi-instance read.
    fn lock(&self) -> MutexGuard<'_, EntityCollection<Self::Instance>> {
        self.collection().lock()
    }

    fn size(&self) -> usize {
        self.lock().size()
    }

    /// Stops background work and drops every instance.
    fn clean_up(&self) {
        self.lock().clean_up();
    }

    /// Diagnostic dump of every instance, Total last.
    fn dump_string(&self) -> String {
        let guard = self.lock();
        let mut lines: Vec<String> = guard.iter().map(|i| i.dump_string()).collect();
        if let Some(total) = guard.total_instance() {
            lines.push(total.dump_string());
        }
        lines.join("\n")
    }
}

/// Logs consecutive failures of one recurring operation without flooding.
///
/// The first `warn_limit` consecutive failures log at `warn`; further
/// repeats log at `debug` until a success resets the count.
#[derive(Debug, Clone)]
pub struct LogThrottle {
    what: &'static str,
    failures: u32,
    warn_limit: u32,
}

impl LogThrottle {
    pub fn new(what: &'static str, warn_limit: u32) -> Self {
        Self {
            what,
            failures: 0,
            warn_limit: warn_limit.max(1),
        }
    }

    pub fn failure(&mut self, err: &PalError) {
        self.failures = self.failures.saturating_add(1);
        if self.failures <= self.warn_limit {
            warn!("{} failed: {}", self.what, err);
        } else {
            debug!("{} failed ({} in a row): {}", self.what, self.failures, err);
        }
    }

    pub fn success(&mut self) {
        if self.failures > 0 {
            debug!("{} recovered after {} failures", self.what, self.failures);
        }
        self.failures = 0;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }
}
