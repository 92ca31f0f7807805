//! Integration tests for the test item enumeration.
//!
//! Walks the documented lifecycle: five items plus `_Total` after init,
//! counters advancing once per `update(true)`, arrays clearing on the
//! sixth update.

use herakles_pal::{EntityInstance, Enumeration, PalContext, TestItemEnumeration};

fn initialized() -> TestItemEnumeration {
    let ctx = PalContext::default();
    let items = TestItemEnumeration::new(&ctx);
    items.init().unwrap();
    items
}

#[test]
fn test_init_creates_five_items_and_total() {
    let items = initialized();
    assert_eq!(items.size(), 5);

    let guard = items.lock();
    let names: Vec<&str> = guard.iter().map(|i| i.id()).collect();
    assert_eq!(names, vec!["0", "1", "2", "3", "4"]);
    assert!(guard.total_instance().is_some());
    assert!(guard.find("_Total").unwrap().is_total());
    for item in guard.iter() {
        assert_eq!(item.value_a(), Some(0));
        assert_eq!(item.value_d().unwrap().len(), 0);
    }
}

#[test]
fn test_first_update_advances_counters() {
    let items = initialized();
    items.update(true).unwrap();

    let guard = items.lock();
    for item in guard.iter() {
        assert_eq!(item.value_a(), Some(1));
        assert_eq!(item.value_b(), Some(2));
        assert_eq!(item.value_d().unwrap(), &[1]);
        assert_eq!(item.value_e().unwrap(), &["Value1".to_string()]);
        assert_eq!(item.value_f().unwrap().len(), 1);
    }
}

#[test]
fn test_arrays_clear_on_sixth_update() {
    let items = initialized();
    for _ in 0..5 {
        items.update(true).unwrap();
    }
    {
        let guard = items.lock();
        let item = guard.get_instance("2").unwrap();
        assert_eq!(item.value_a(), Some(5));
        assert_eq!(item.value_b(), Some(10));
        assert_eq!(item.value_d().unwrap(), &[1, 2, 3, 4, 5]);
        assert_eq!(item.value_e().unwrap().len(), 5);
        assert_eq!(item.value_f().unwrap().len(), 5);
    }

    items.update(true).unwrap();
    let guard = items.lock();
    let item = guard.get_instance("2").unwrap();
    assert_eq!(item.value_a(), Some(6));
    assert!(item.value_d().unwrap().is_empty());
    assert!(item.value_e().unwrap().is_empty());
    assert!(item.value_f().unwrap().is_empty());
}

#[test]
fn test_properties_and_dump() {
    let items = initialized();
    items.update(true).unwrap();

    let guard = items.lock();
    let props = guard.get_instance("0").unwrap().properties();
    assert!(props.get_property("ValueA").is_some());
    assert!(props.get_property("nonexistent").is_none());
    assert_eq!(props.get_key("Name").unwrap().value.to_string(), "0");
    drop(guard);

    let dump = items.dump_string();
    assert_eq!(dump.lines().count(), 6);
    assert!(dump.lines().last().unwrap().contains("Name = _Total"));
}

#[test]
fn test_create_replaces_existing_item() {
    let items = initialized();
    items.update(true).unwrap();
    items.create(3);
    items.create(7);

    let guard = items.lock();
    assert_eq!(guard.size(), 6);
    assert_eq!(guard.get_instance("3").unwrap().value_a(), Some(0));
    assert_eq!(guard.get_instance_at(3).unwrap().id(), "3");
    assert_eq!(guard.get_instance_at(5).unwrap().id(), "7");
}
