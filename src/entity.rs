//! Entity instances: one monitored OS object each.
//!
//! Every concrete instance (memory snapshot, disk, process, network interface,
//! OS identity) embeds an [`InstanceBase`] and implements [`EntityInstance`].
//! Accessors on concrete instances return `Option<T>`; `None` means the metric
//! is not supported for this platform or instance, which is distinct from a
//! value of zero.

use crate::error::Result;
use crate::property::{Property, PropertySet};

/// Name given to the synthetic aggregate instance of a collection.
pub const TOTAL_INSTANCE_NAME: &str = "_Total";

/// Identity and status shared by all instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceBase {
    id: String,
    is_total: bool,
    online: bool,
    unexpected_error: bool,
}

impl InstanceBase {
    pub fn new(id: impl Into<String>, is_total: bool) -> Self {
        Self {
            id: id.into(),
            is_total,
            online: true,
            unexpected_error: false,
        }
    }

    /// Base for the `_Total` row of a collection.
    pub fn total() -> Self {
        Self::new(TOTAL_INSTANCE_NAME, true)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn is_total(&self) -> bool {
        self.is_total
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn has_unexpected_error(&self) -> bool {
        self.unexpected_error
    }

    pub fn set_unexpected_error(&mut self, value: bool) {
        self.unexpected_error = value;
    }
}

/// Common capability of every monitored entity.
pub trait EntityInstance: Send + 'static {
    fn base(&self) -> &InstanceBase;

    fn base_mut(&mut self) -> &mut InstanceBase;

    /// Pulls fresh values from the instance's dependency.
    ///
    /// Returns `PalError::NotFound` when the backing entity vanished; other
    /// errors mean this sample was skipped and previous data is retained.
    fn update(&mut self) -> Result<()>;

    /// Releases platform handles. Must be idempotent.
    fn clean_up(&mut self) {}

    /// Diagnostic one-line representation.
    fn dump_string(&self) -> String;

    /// Flattens the instance into a property bag.
    fn properties(&self) -> PropertySet {
        base_properties(self.base())
    }

    fn id(&self) -> &str {
        self.base().id()
    }

    fn is_total(&self) -> bool {
        self.base().is_total()
    }

    fn is_online(&self) -> bool {
        self.base().is_online()
    }

    fn set_online(&mut self, online: bool) {
        self.base_mut().set_online(online);
    }
}

/// Key and status properties every instance exposes.
pub fn base_properties(base: &InstanceBase) -> PropertySet {
    let mut set = PropertySet::new();
    set.add_key(Property::new("Name", base.id()));
    set.add_property(Property::new("IsTotal", base.is_total()));
    set.add_property(Property::new("Online", base.is_online()));
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_is_online() {
        let base = InstanceBase::new("sda", false);
        assert_eq!(base.id(), "sda");
        assert!(base.is_online());
        assert!(!base.is_total());
        assert!(!base.has_unexpected_error());
    }

    #[test]
    fn test_total_base() {
        let base = InstanceBase::total();
        assert_eq!(base.id(), TOTAL_INSTANCE_NAME);
        assert!(base.is_total());
    }

    #[test]
    fn test_base_properties() {
        let mut base = InstanceBase::new("eth0", false);
        base.set_online(false);
        let set = base_properties(&base);
        assert_eq!(set.get_key("Name").unwrap().value.to_string(), "eth0");
        assert_eq!(set.get_property("Online").unwrap().value.to_string(), "false");
    }
}
