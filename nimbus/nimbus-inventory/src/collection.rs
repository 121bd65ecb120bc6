//! Inventory collections: named registries of inventory objects plus the
//! policy used to synchronize them.

use crate::object::InventoryObject;
use indexmap::IndexMap;
use nimbus_core::error::{NimbusError, Result};
use nimbus_core::types::{IntoKey, InventoryKey, LazyReference, StoredRecord, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// Collection Policy
// ============================================================================

/// How much of a collection's membership one run enumerates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// The run sees the whole membership; unseen stored rows are deleted
    Complete,
    /// The run sees a subset; absence implies nothing
    Targeted,
}

/// Which manager's rows a collection reads and writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionScope {
    #[default]
    Manager,
    ParentManager,
}

/// Static declaration of one collection of a manager type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub strategy: Strategy,
    /// Preload current store rows before parsing
    pub cache: bool,
    pub scope: CollectionScope,
    /// Shared, pre-populated collection used only as a resolution target
    pub read_only: bool,
    /// Attribute names composing the key for `find_or_build_by`
    pub manager_ref: Vec<String>,
    /// Collections this one is written after
    pub depends_on: Vec<String>,
}

impl CollectionSpec {
    pub fn new(name: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            strategy,
            cache: false,
            scope: CollectionScope::Manager,
            read_only: false,
            manager_ref: Vec::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn complete(name: impl Into<String>) -> Self {
        Self::new(name, Strategy::Complete)
    }

    pub fn targeted(name: impl Into<String>) -> Self {
        Self::new(name, Strategy::Targeted)
    }

    /// Read-only collection shared from the parent manager
    pub fn shared(name: impl Into<String>) -> Self {
        Self::targeted(name).parent_scoped().cached().read_only()
    }

    pub fn cached(mut self) -> Self {
        self.cache = true;
        self
    }

    pub fn parent_scoped(mut self) -> Self {
        self.scope = CollectionScope::ParentManager;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn manager_ref<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manager_ref = attributes.into_iter().map(Into::into).collect();
        self
    }

    pub fn depends_on<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = collections.into_iter().map(Into::into).collect();
        self
    }
}

// ============================================================================
// Resolution Targets
// ============================================================================

/// Where a key was found during lookup
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Built(&'a InventoryObject),
    Cached(&'a StoredRecord),
}

impl<'a> Target<'a> {
    /// Current value of an attribute of the target
    pub fn attribute(&self, name: &str) -> Option<&'a Value> {
        match self {
            Target::Built(object) => object.get(name),
            Target::Cached(record) => record.attributes.get(name),
        }
    }
}

// ============================================================================
// Inventory Collection
// ============================================================================

/// A named registry of inventory objects for one run.
#[derive(Debug, Clone)]
pub struct InventoryCollection {
    spec: CollectionSpec,
    objects: IndexMap<InventoryKey, InventoryObject>,
    cache: Option<HashMap<InventoryKey, StoredRecord>>,
}

impl InventoryCollection {
    pub fn new(spec: CollectionSpec) -> Self {
        Self {
            spec,
            objects: IndexMap::new(),
            cache: None,
        }
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn strategy(&self) -> Strategy {
        self.spec.strategy
    }

    pub fn cache_mode(&self) -> bool {
        self.spec.cache
    }

    pub fn is_read_only(&self) -> bool {
        self.spec.read_only
    }

    /// Replace the preloaded cache index with the given store rows
    pub fn load_cache(&mut self, records: Vec<StoredRecord>) {
        let index = records.into_iter().map(|r| (r.key.clone(), r)).collect();
        self.cache = Some(index);
    }

    /// Whether the cache index has been loaded
    pub fn is_cache_loaded(&self) -> bool {
        self.cache.is_some()
    }

    pub fn cached(&self, key: &InventoryKey) -> Option<&StoredRecord> {
        self.cache.as_ref().and_then(|c| c.get(key))
    }

    /// Return the object for `key`, building an empty one if needed.
    ///
    /// A missing or blank key is an identity error; the caller skips the record.
    pub fn find_or_build(&mut self, key: impl IntoKey) -> Result<&mut InventoryObject> {
        let key = key.into_key().map_err(|e| e.in_collection(&self.spec.name))?;
        self.build(key)
    }

    /// Return the object keyed by the declared `manager_ref` attributes,
    /// building it if needed. The key attributes are assigned on the object.
    pub fn find_or_build_by(&mut self, attributes: &[(&str, Value)]) -> Result<&mut InventoryObject> {
        let key = self.key_for(attributes)?;
        let object = self.build(key)?;
        for (name, value) in attributes {
            object.set(name, value.clone());
        }
        Ok(object)
    }

    fn build(&mut self, key: InventoryKey) -> Result<&mut InventoryObject> {
        if self.spec.read_only {
            return Err(NimbusError::config(format!(
                "collection '{}' is read-only in this manager",
                self.spec.name
            )));
        }
        let persisted = self.cached(&key).is_some();
        let name = &self.spec.name;
        Ok(self
            .objects
            .entry(key.clone())
            .or_insert_with(|| InventoryObject::new(name, key, persisted)))
    }

    /// Composite key from the declared `manager_ref` attributes
    pub fn key_for(&self, attributes: &[(&str, Value)]) -> Result<InventoryKey> {
        if self.spec.manager_ref.is_empty() {
            return Err(NimbusError::config(format!(
                "collection '{}' declares no manager_ref attributes",
                self.spec.name
            )));
        }
        if let Some((name, _)) = attributes
            .iter()
            .find(|(name, _)| !self.spec.manager_ref.iter().any(|r| r == name))
        {
            return Err(NimbusError::config(format!(
                "'{}' is not a manager_ref attribute of collection '{}'",
                name, self.spec.name
            )));
        }

        let mut parts = Vec::new();
        for ref_name in &self.spec.manager_ref {
            let value = attributes
                .iter()
                .find(|(name, _)| name == ref_name)
                .map(|(_, value)| value)
                .ok_or_else(|| {
                    NimbusError::identity(format!("missing key attribute '{}'", ref_name))
                        .in_collection(&self.spec.name)
                })?;
            let value_parts = value
                .key_parts()
                .map_err(|e| e.in_collection(&self.spec.name))?;
            parts.extend(value_parts);
        }
        InventoryKey::composite(parts).map_err(|e| e.in_collection(&self.spec.name))
    }

    /// Unresolved reference to the object with `key`; the object need not exist yet
    pub fn lazy_find(&self, key: impl IntoKey) -> Result<LazyReference> {
        let key = key.into_key().map_err(|e| e.in_collection(&self.spec.name))?;
        Ok(LazyReference::new(self.spec.name.clone(), key))
    }

    /// Unresolved reference keyed by `manager_ref` attributes
    pub fn lazy_find_by(&self, attributes: &[(&str, Value)]) -> Result<LazyReference> {
        let key = self.key_for(attributes)?;
        Ok(LazyReference::new(self.spec.name.clone(), key))
    }

    /// Built object for `key`
    pub fn find(&self, key: &InventoryKey) -> Option<&InventoryObject> {
        self.objects.get(key)
    }

    /// Built object for `key`, falling back to the cache index when enabled
    pub fn lookup(&self, key: &InventoryKey) -> Option<Target<'_>> {
        if let Some(object) = self.objects.get(key) {
            return Some(Target::Built(object));
        }
        if self.spec.cache {
            return self.cached(key).map(Target::Cached);
        }
        None
    }

    /// Objects built in this run, in creation order
    pub fn all_built(&self) -> impl Iterator<Item = &InventoryObject> {
        self.objects.values()
    }

    pub(crate) fn find_mut(&mut self, key: &InventoryKey) -> Option<&mut InventoryObject> {
        self.objects.get_mut(key)
    }

    /// Drop every object built after the first `len`
    pub(crate) fn truncate(&mut self, len: usize) {
        self.objects.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::types::{Attributes, ObjectRef};

    fn key(id: &str) -> InventoryKey {
        InventoryKey::new(id).unwrap()
    }

    #[test]
    fn test_find_or_build_dedups_and_merges() {
        let mut vms = InventoryCollection::new(CollectionSpec::complete("vms"));
        vms.find_or_build("s1").unwrap().set("name", "vm1");
        vms.find_or_build("s1").unwrap().set("name", "vm1-renamed").set("vendor", "telefonica");
        vms.find_or_build("s2").unwrap();

        assert_eq!(vms.len(), 2);
        let s1 = vms.find(&key("s1")).unwrap();
        assert_eq!(s1.get("name"), Some(&Value::from("vm1-renamed")));
        assert_eq!(s1.get("vendor"), Some(&Value::from("telefonica")));

        let order: Vec<String> = vms.all_built().map(|o| o.key().to_string()).collect();
        assert_eq!(order, vec!["s1", "s2"]);
    }

    #[test]
    fn test_missing_key_is_identity_error() {
        let mut vms = InventoryCollection::new(CollectionSpec::complete("vms"));
        let err = vms.find_or_build(None::<&str>).unwrap_err();
        assert!(err.is_record_scoped());
        assert!(err.to_string().contains("(vms)"));
        assert!(vms.is_empty());
    }

    #[test]
    fn test_find_or_build_by_composite_key() {
        let spec = CollectionSpec::complete("disks").manager_ref(["hardware", "device_name"]);
        let mut disks = InventoryCollection::new(spec);
        let hardware = Value::Link(ObjectRef::new("hardwares", key("s1")));

        let disk = disks
            .find_or_build_by(&[("device_name", Value::from("Root disk")), ("hardware", hardware.clone())])
            .unwrap();
        disk.set("location", "vda");
        assert_eq!(
            disk.key().parts(),
            &["hardwares".to_string(), "s1".to_string(), "Root disk".to_string()]
        );
        assert_eq!(disk.get("hardware"), Some(&hardware));

        disks
            .find_or_build_by(&[("hardware", hardware), ("device_name", Value::from("Root disk"))])
            .unwrap()
            .set("size", 1024_i64);
        assert_eq!(disks.len(), 1);
    }

    #[test]
    fn test_find_or_build_by_rejects_undeclared_attributes() {
        let spec = CollectionSpec::complete("disks").manager_ref(["hardware", "device_name"]);
        let mut disks = InventoryCollection::new(spec);
        let err = disks
            .find_or_build_by(&[("location", Value::from("vda"))])
            .unwrap_err();
        assert!(err.is_configuration());

        let err = disks
            .find_or_build_by(&[("device_name", Value::from("vda"))])
            .unwrap_err();
        assert!(err.is_record_scoped());
    }

    #[test]
    fn test_reference_keys_keep_owner_collection() {
        let spec = CollectionSpec::complete("hardwares").manager_ref(["vm_or_template"]);
        let mut hardwares = InventoryCollection::new(spec);
        let vm = Value::Link(ObjectRef::new("vms", key("x1")));
        let template = Value::Link(ObjectRef::new("miq_templates", key("x1")));

        hardwares.find_or_build_by(&[("vm_or_template", vm.clone())]).unwrap();
        hardwares.find_or_build_by(&[("vm_or_template", template)]).unwrap();
        assert_eq!(hardwares.len(), 2);

        let lazy = Value::Lazy(LazyReference::new("vms", key("x1")));
        let by_lazy = hardwares.lazy_find_by(&[("vm_or_template", lazy)]).unwrap();
        let by_link = hardwares.find_or_build_by(&[("vm_or_template", vm)]).unwrap();
        assert_eq!(&by_lazy.key, by_link.key());
    }

    #[test]
    fn test_truncate_drops_later_objects() {
        let mut vms = InventoryCollection::new(CollectionSpec::complete("vms"));
        vms.find_or_build("s1").unwrap();
        vms.find_or_build("s2").unwrap();
        vms.find_or_build("s3").unwrap();

        vms.truncate(1);
        assert_eq!(vms.len(), 1);
        assert!(vms.find(&key("s1")).is_some());
        assert!(vms.find(&key("s3")).is_none());
    }

    #[test]
    fn test_cache_lookup_and_persisted_flag() {
        let mut tenants = InventoryCollection::new(CollectionSpec::complete("cloud_tenants").cached());
        tenants.load_cache(vec![StoredRecord::new(key("t1"), Attributes::new())]);

        assert!(matches!(tenants.lookup(&key("t1")), Some(Target::Cached(_))));
        assert!(tenants.find_or_build("t1").unwrap().is_persisted());
        assert!(!tenants.find_or_build("t2").unwrap().is_persisted());
        assert!(matches!(tenants.lookup(&key("t1")), Some(Target::Built(_))));
    }

    #[test]
    fn test_read_only_collection_refuses_build() {
        let mut vms = InventoryCollection::new(CollectionSpec::shared("vms"));
        assert!(vms.find_or_build("s1").unwrap_err().is_configuration());
        assert_eq!(vms.lazy_find("s1").unwrap().collection, "vms");
    }
}
