//! Integration tests for the enumeration contract.
//!
//! A small in-test resource backed by a shared list of names stands in for
//! the OS so discovery, reconciliation and the update failure policy can
//! be driven step by step.

use herakles_pal::enumeration::reconcile;
use herakles_pal::{
    EntityCollection, EntityInstance, Enumeration, InstanceBase, KeyNormalization, NamedLock,
    PalContext, PalError, PurgePolicy, Result,
};
use std::sync::{Arc, Mutex};

/// What the fake OS currently reports, name to counter.
#[derive(Default)]
struct FakeWorld {
    entities: Mutex<Vec<(String, u64)>>,
    failing: Mutex<Option<String>>,
}

impl FakeWorld {
    fn set(&self, entities: &[(&str, u64)]) {
        *self.entities.lock().unwrap() = entities
            .iter()
            .map(|(n, v)| (n.to_string(), *v))
            .collect();
    }

    fn value(&self, name: &str) -> Result<u64> {
        if self.failing.lock().unwrap().as_deref() == Some(name) {
            return Err(PalError::Internal("counter unreadable".into()));
        }
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
            .ok_or_else(|| PalError::not_found(name))
    }
}

struct Widget {
    base: InstanceBase,
    world: Arc<FakeWorld>,
    value: u64,
    updates: u32,
}

impl EntityInstance for Widget {
    fn base(&self) -> &InstanceBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut InstanceBase {
        &mut self.base
    }

    fn update(&mut self) -> Result<()> {
        self.value = self.world.value(self.id())?;
        self.updates += 1;
        Ok(())
    }

    fn dump_string(&self) -> String {
        format!("Widget: Name = {}, Value = {}", self.id(), self.value)
    }
}

struct WidgetEnumeration {
    collection: NamedLock<EntityCollection<Widget>>,
    world: Arc<FakeWorld>,
    policy: PurgePolicy,
}

impl WidgetEnumeration {
    fn new(ctx: &PalContext, world: Arc<FakeWorld>, policy: PurgePolicy) -> Self {
        Self {
            collection: ctx.create_lock(
                "widgets",
                EntityCollection::new(KeyNormalization::CaseInsensitive),
            ),
            world,
            policy,
        }
    }
}

impl Enumeration for WidgetEnumeration {
    type Instance = Widget;

    fn collection(&self) -> &NamedLock<EntityCollection<Widget>> {
        &self.collection
    }

    fn update_no_lock(
        &self,
        collection: &mut EntityCollection<Widget>,
        update_instances: bool,
    ) -> Result<()> {
        let discovered = self.world.entities.lock().unwrap().clone();
        let world = self.world.clone();
        reconcile(
            collection,
            discovered,
            self.policy,
            update_instances,
            |_, _| {},
            |key, value| {
                Some(Widget {
                    base: InstanceBase::new(key, false),
                    world: world.clone(),
                    value,
                    updates: 0,
                })
            },
        );
        Ok(())
    }
}

fn setup(policy: PurgePolicy) -> (Arc<FakeWorld>, WidgetEnumeration) {
    let world = Arc::new(FakeWorld::default());
    world.set(&[("alpha", 1), ("beta", 2), ("gamma", 3)]);
    let ctx = PalContext::default();
    let widgets = WidgetEnumeration::new(&ctx, world.clone(), policy);
    widgets.init().unwrap();
    (world, widgets)
}

#[test]
fn test_retained_instances_go_offline_in_place() {
    let (world, widgets) = setup(PurgePolicy::Retain);
    world.set(&[("alpha", 1), ("gamma", 3), ("delta", 4)]);
    widgets.update(false).unwrap();

    let guard = widgets.lock();
    let order: Vec<(&str, bool)> = guard.iter().map(|w| (w.id(), w.is_online())).collect();
    assert_eq!(
        order,
        vec![
            ("alpha", true),
            ("beta", false),
            ("gamma", true),
            ("delta", true)
        ]
    );
}

#[test]
fn test_purged_instances_are_removed() {
    let (world, widgets) = setup(PurgePolicy::Purge);
    world.set(&[("gamma", 3)]);
    widgets.update(false).unwrap();

    let guard = widgets.lock();
    assert_eq!(guard.size(), 1);
    assert!(guard.get_instance("alpha").is_none());
    assert_eq!(guard.get_instance_at(0).unwrap().id(), "gamma");
}

#[test]
fn test_update_false_is_idempotent() {
    let (_, widgets) = setup(PurgePolicy::Retain);
    let before = widgets.dump_string();
    widgets.update(false).unwrap();
    widgets.update(false).unwrap();
    assert_eq!(widgets.dump_string(), before);
    assert!(widgets.lock().iter().all(|w| w.updates == 0));
}

#[test]
fn test_update_true_refreshes_online_only() {
    let (world, widgets) = setup(PurgePolicy::Retain);
    world.set(&[("alpha", 10), ("gamma", 30)]);
    widgets.update(true).unwrap();

    let guard = widgets.lock();
    assert_eq!(guard.get_instance("alpha").unwrap().value, 10);
    let beta = guard.get_instance("beta").unwrap();
    assert!(!beta.is_online());
    assert_eq!(beta.updates, 0);
    assert_eq!(beta.value, 2);
}

#[test]
fn test_update_failure_keeps_previous_value() {
    let (world, widgets) = setup(PurgePolicy::Retain);
    world.set(&[("alpha", 10), ("beta", 20), ("gamma", 30)]);
    *world.failing.lock().unwrap() = Some("beta".into());
    widgets.update(true).unwrap();

    let guard = widgets.lock();
    let beta = guard.get_instance("beta").unwrap();
    assert!(beta.is_online());
    assert!(beta.base().has_unexpected_error());
    assert_eq!(beta.value, 2);
    assert_eq!(guard.get_instance("gamma").unwrap().value, 30);
}

#[test]
fn test_lookup_is_case_insensitive() {
    let (_, widgets) = setup(PurgePolicy::Retain);
    let guard = widgets.lock();
    assert_eq!(guard.get_instance("ALPHA").unwrap().id(), "alpha");
    assert!(guard.find("_Total").is_none());
    assert!(matches!(
        guard.get_instance_at(3),
        Err(PalError::IllegalIndex { index: 3, .. })
    ));
}

#[test]
fn test_clean_up_empties_collection() {
    let (_, widgets) = setup(PurgePolicy::Retain);
    widgets.clean_up();
    assert_eq!(widgets.size(), 0);
}
