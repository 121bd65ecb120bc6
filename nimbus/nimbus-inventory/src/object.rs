//! Inventory objects: the nodes of the inventory graph.

use nimbus_core::types::{Attributes, InventoryKey, ObjectRef, Value};

/// A single node in the inventory graph.
///
/// Objects are only created through their collection's `find_or_build`, so
/// there is exactly one object per key and collection in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct InventoryObject {
    collection: String,
    key: InventoryKey,
    attributes: Attributes,
    persisted: bool,
}

impl InventoryObject {
    pub(crate) fn new(collection: &str, key: InventoryKey, persisted: bool) -> Self {
        Self {
            collection: collection.to_string(),
            key,
            attributes: Attributes::new(),
            persisted,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &InventoryKey {
        &self.key
    }

    /// Link to this object, usable as an attribute of another object
    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.collection.clone(), self.key.clone())
    }

    /// Whether the key was found in the collection's preloaded cache
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Assign an attribute; a later assignment of the same name wins
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Assign several attributes at once
    pub fn assign<I, S, V>(&mut self, attributes: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        for (name, value) in attributes {
            self.attributes.insert(name.into(), value.into());
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub(crate) fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_later_assignment_wins() {
        let mut object = InventoryObject::new("vms", InventoryKey::new("s1").unwrap(), false);
        object.set("name", "first").set("power_state", "on");
        object.assign([("name", Value::from("second"))]);

        assert_eq!(object.get("name"), Some(&Value::from("second")));
        assert_eq!(object.get("power_state"), Some(&Value::from("on")));
        assert_eq!(object.attributes().len(), 2);
        assert_eq!(object.object_ref().to_string(), "vms:s1");
    }
}
