//! A synthetic enumeration of five counters plus `_Total`.
//!
//! It touches no OS state, which makes it the reference for the minimal
//! enumeration contract: populate once, update in place, never purge.
//! Each `update(true)` bumps A by one and B by two, and appends to the
//! D, E and F arrays, which are cleared once they grow past five entries.

use chrono::{DateTime, Local};
use tracing::{instrument, trace};

use crate::context::PalContext;
use crate::entity::{base_properties, EntityInstance, InstanceBase};
use crate::enumeration::{apply_update, EntityCollection, Enumeration, KeyNormalization};
use crate::error::Result;
use crate::locks::NamedLock;
use crate::property::PropertySet;

/// Number of items created on first update.
pub const TEST_ITEM_COUNT: u32 = 5;

/// Arrays are cleared once they exceed this length.
pub const MAX_ARRAY_LEN: usize = 5;

pub struct TestItemInstance {
    base: InstanceBase,
    item_number: u32,
    value_a: u64,
    value_b: u64,
    value_c: DateTime<Local>,
    value_d: Vec<u64>,
    value_e: Vec<String>,
    value_f: Vec<DateTime<Local>>,
}

impl TestItemInstance {
    pub fn new(item_number: u32) -> Self {
        Self::build(InstanceBase::new(item_number.to_string(), false), item_number)
    }

    pub fn total() -> Self {
        Self::build(InstanceBase::total(), 0)
    }

    fn build(base: InstanceBase, item_number: u32) -> Self {
        Self {
            base,
            item_number,
            value_a: 0,
            value_b: 0,
            value_c: Local::now(),
            value_d: Vec::new(),
            value_e: Vec::new(),
            value_f: Vec::new(),
        }
    }

    pub fn item_number(&self) -> u32 {
        self.item_number
    }

    pub fn value_a(&self) -> Option<u64> {
        Some(self.value_a)
    }

    pub fn value_b(&self) -> Option<u64> {
        Some(self.value_b)
    }

    /// Creation time.
    pub fn value_c(&self) -> Option<DateTime<Local>> {
        Some(self.value_c)
    }

    pub fn value_d(&self) -> Option<&[u64]> {
        Some(&self.value_d)
    }

    pub fn value_e(&self) -> Option<&[String]> {
        Some(&self.value_e)
    }

    pub fn value_f(&self) -> Option<&[DateTime<Local>]> {
        Some(&self.value_f)
    }
}

fn push_capped<T>(values: &mut Vec<T>, value: T) {
    values.push(value);
    if values.len() > MAX_ARRAY_LEN {
        values.clear();
    }
}

impl EntityInstance for TestItemInstance {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<()> {
        self.value_a += 1;
        self.value_b += 2;
        push_capped(&mut self.value_d, self.value_a);
        push_capped(&mut self.value_e, format!("Value{}", self.value_a));
        push_capped(&mut self.value_f, Local::now());
        trace!("Test item {} updated: A = {}", self.id(), self.value_a);
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!(
            "TestItemInstance: Name = {}, A = {}, B = {}, C = {}, D = {:?}, E = {:?}, F = {}",
            self.id(),
            self.value_a,
            self.value_b,
            self.value_c.to_rfc3339(),
            self.value_d,
            self.value_e,
            self.value_f.len()
        )
    }

    fn properties(&self) -> PropertySet {
        let mut set = base_properties(&self.base);
        set.add_optional("ValueA", self.value_a());
        set.add_optional("ValueB", self.value_b());
        set.add_optional("ValueC", self.value_c());
        set.add_optional("ValueD", self.value_d().map(<[u64]>::to_vec));
        set.add_optional("ValueE", self.value_e().map(<[String]>::to_vec));
        set.add_optional("ValueF", self.value_f().map(<[DateTime<Local>]>::to_vec));
        set
    }
}

pub struct TestItemEnumeration {
    collection: NamedLock<EntityCollection<TestItemInstance>>,
}

impl TestItemEnumeration {
    pub fn new(ctx: &PalContext) -> Self {
        Self {
            collection: ctx.create_lock(
                "herakles_pal.testitem",
                EntityCollection::new(KeyNormalization::Exact),
            ),
        }
    }

    /// Adds item `item_number`, replacing any item with the same name.
    pub fn create(&self, item_number: u32) {
        self.collection
            .lock()
            .add_instance(TestItemInstance::new(item_number));
    }
}

impl Enumeration for TestItemEnumeration {
    type Instance = TestItemInstance;

    fn collection(&self) -> &NamedLock<EntityCollection<TestItemInstance>> {
        &self.collection
    }

    #[instrument(skip(self))]
    fn init(&self) -> Result<()> {
        let mut guard = self.collection.lock();
        guard.set_total_instance(TestItemInstance::total());
        self.update_no_lock(&mut guard, false)
    }

    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<TestItemInstance>,
        update_instances: bool,
    ) -> Result<()> {
        if collection.is_empty() {
            for number in 0..TEST_ITEM_COUNT {
                trace!("Adding test item {}", number);
                collection.add_instance(TestItemInstance::new(number));
            }
        }
        if update_instances {
            for instance in collection.iter_mut() {
                apply_update(instance);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_capped_clears_past_limit() {
        let mut values = Vec::new();
        for i in 0..5 {
            push_capped(&mut values, i);
        }
        assert_eq!(values.len(), 5);
        push_capped(&mut values, 5);
        assert!(values.is_empty());
    }

    #[test]
    fn test_update_false_is_idempotent() {
        let ctx = PalContext::default();
        let items = TestItemEnumeration::new(&ctx);
        items.init().unwrap();
        items.update(false).unwrap();
        items.update(false).unwrap();
        assert_eq!(items.size(), 5);
        assert_eq!(items.lock().get_instance("3").unwrap().value_a(), Some(0));
    }

    #[test]
    fn test_total_is_not_updated() {
        let ctx = PalContext::default();
        let items = TestItemEnumeration::new(&ctx);
        items.init().unwrap();
        items.update(true).unwrap();
        let guard = items.lock();
        assert_eq!(guard.total_instance().unwrap().value_a(), Some(0));
        assert_eq!(guard.find("_Total").unwrap().id(), "_Total");
    }
}
