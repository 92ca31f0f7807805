//! Property bags for rendering instances.
//!
//! Every entity instance can be flattened into a `PropertySet`: an ordered
//! list of key properties (identity) followed by an ordered list of value
//! properties. Lookups by name return `None` for unknown names; lookups by
//! position fail with `PalError::IllegalIndex`.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::fmt;

use crate::error::{PalError, Result};

/// Typed value of a single property.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    UInt(u64),
    Int(i64),
    Real(f64),
    Text(String),
    DateTime(DateTime<Local>),
    UIntArray(Vec<u64>),
    TextArray(Vec<String>),
    DateTimeArray(Vec<DateTime<Local>>),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(v) => write!(f, "{}", v),
            PropertyValue::UInt(v) => write!(f, "{}", v),
            PropertyValue::Int(v) => write!(f, "{}", v),
            PropertyValue::Real(v) => write!(f, "{:.2}", v),
            PropertyValue::Text(v) => write!(f, "{}", v),
            PropertyValue::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
            PropertyValue::UIntArray(v) => write!(f, "{:?}", v),
            PropertyValue::TextArray(v) => write!(f, "{:?}", v),
            PropertyValue::DateTimeArray(v) => {
                let s: Vec<String> = v.iter().map(|d| d.to_rfc3339()).collect();
                write!(f, "{:?}", s)
            }
        }
    }
}

macro_rules! impl_from_for_property_value {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for PropertyValue {
                fn from(v: $t) -> Self {
                    PropertyValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for_property_value!(
    bool => Bool,
    u64 => UInt,
    u32 => UInt,
    i64 => Int,
    i32 => Int,
    f64 => Real,
    String => Text,
    &str => Text,
    DateTime<Local> => DateTime,
    Vec<u64> => UIntArray,
    Vec<String> => TextArray,
    Vec<DateTime<Local>> => DateTimeArray,
);

/// A named value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered keys and properties describing one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PropertySet {
    keys: Vec<Property>,
    properties: Vec<Property>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, key: Property) {
        self.keys.push(key);
    }

    pub fn add_property(&mut self, property: Property) {
        self.properties.push(property);
    }

    /// Adds `name` only when the platform supports it; `None` is skipped so
    /// that unsupported metrics are absent rather than zero.
    pub fn add_optional<V: Into<PropertyValue>>(&mut self, name: &str, value: Option<V>) {
        if let Some(v) = value {
            self.properties.push(Property::new(name, v));
        }
    }

    pub fn number_of_properties(&self) -> usize {
        self.properties.len()
    }

    pub fn number_of_keys(&self) -> usize {
        self.keys.len()
    }

    /// Property at `pos`, failing with `IllegalIndex` outside `[0, len)`.
    pub fn get_property_at(&self, pos: usize) -> Result<&Property> {
        self.properties
            .get(pos)
            .ok_or_else(|| PalError::illegal_index("pos", pos, self.properties.len()))
    }

    /// Property named `name`, or `None`.
    pub fn get_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn get_key_at(&self, pos: usize) -> Result<&Property> {
        self.keys
            .get(pos)
            .ok_or_else(|| PalError::illegal_index("pos", pos, self.keys.len()))
    }

    pub fn get_key(&self, name: &str) -> Option<&Property> {
        self.keys.iter().find(|p| p.name == name)
    }

    pub fn keys(&self) -> &[Property] {
        &self.keys
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }
}

impl fmt::Display for PropertySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self
            .keys
            .iter()
            .map(|k| format!("{}={}", k.name, k.value))
            .collect();
        write!(f, "[{}]", keys.join(", "))?;
        for p in &self.properties {
            write!(f, " {}={}", p.name, p.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_properties() -> PropertySet {
        let mut set = PropertySet::new();
        set.add_key(Property::new("Name", "disk0"));
        set.add_property(Property::new("Size", 1024u64));
        set.add_property(Property::new("ReadOnly", false));
        set.add_property(Property::new("FileSystem", "ext4"));
        set
    }

    #[test]
    fn test_get_property_by_name() {
        let set = three_properties();
        assert_eq!(set.number_of_properties(), 3);
        assert_eq!(
            set.get_property("Size").map(|p| &p.value),
            Some(&PropertyValue::UInt(1024))
        );
        assert!(set.get_property("nonexistent").is_none());
    }

    #[test]
    fn test_get_property_at_out_of_range() {
        let set = three_properties();
        assert_eq!(set.get_property_at(2).unwrap().name, "FileSystem");
        let err = set.get_property_at(5).unwrap_err();
        assert_eq!(err.to_string(), "illegal index for pos: 5 not in [0,3)");
    }

    #[test]
    fn test_add_optional_skips_unsupported() {
        let mut set = PropertySet::new();
        set.add_optional::<u64>("Reserved", None);
        set.add_optional("Used", Some(7u64));
        assert_eq!(set.number_of_properties(), 1);
        assert!(set.get_property("Reserved").is_none());
    }

    #[test]
    fn test_display() {
        let set = three_properties();
        assert_eq!(
            set.to_string(),
            "[Name=disk0] Size=1024 ReadOnly=false FileSystem=ext4"
        );
    }
}
