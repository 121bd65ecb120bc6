//! Lazy reference resolution over the collections of one Persister.
//!
//! Resolution runs in passes. Each pass replaces every lazy reference whose
//! target can be decided: a link when the target exists, null when it does not,
//! or the projected attribute once that attribute is itself free of lazy
//! references. A pass that changes nothing while references remain means the
//! projections form a cycle.

use crate::collection::InventoryCollection;
use indexmap::IndexMap;
use nimbus_core::error::{NimbusError, Result};
use nimbus_core::types::{InventoryKey, LazyReference, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Counters describing one resolution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionStats {
    pub passes: usize,
    pub links: usize,
    pub projections: usize,
    pub dangling: usize,
}

struct Replacement {
    collection: String,
    key: InventoryKey,
    attribute: String,
    value: Value,
}

/// Replace every lazy reference held by any built object
pub fn resolve(collections: &mut IndexMap<String, InventoryCollection>) -> Result<ResolutionStats> {
    let mut stats = ResolutionStats::default();

    loop {
        stats.passes += 1;
        let mut replacements = Vec::new();
        let mut blocked: Vec<String> = Vec::new();

        for (name, collection) in collections.iter() {
            for object in collection.all_built() {
                for (attribute, value) in object.attributes() {
                    if !value.has_unresolved() {
                        continue;
                    }
                    let mut waiting = Vec::new();
                    let resolved = resolve_value(value, collections, &mut stats, &mut waiting)?;
                    if !waiting.is_empty() {
                        blocked.push(name.clone());
                        blocked.extend(waiting);
                    }
                    if &resolved != value {
                        replacements.push(Replacement {
                            collection: name.clone(),
                            key: object.key().clone(),
                            attribute: attribute.clone(),
                            value: resolved,
                        });
                    }
                }
            }
        }

        let progressed = !replacements.is_empty();
        for replacement in replacements {
            if let Some(object) = collections
                .get_mut(&replacement.collection)
                .and_then(|c| c.find_mut(&replacement.key))
            {
                object
                    .attributes_mut()
                    .insert(replacement.attribute, replacement.value);
            }
        }

        if blocked.is_empty() {
            break;
        }
        if !progressed {
            return Err(NimbusError::deadlock(blocked));
        }
    }

    debug!(
        "Resolved lazy references in {} passes: {} links, {} projections, {} dangling",
        stats.passes, stats.links, stats.projections, stats.dangling
    );
    Ok(stats)
}

/// Resolve what can be resolved in `value`; references that must wait push
/// their target collection onto `waiting` and stay lazy.
fn resolve_value(
    value: &Value,
    collections: &IndexMap<String, InventoryCollection>,
    stats: &mut ResolutionStats,
    waiting: &mut Vec<String>,
) -> Result<Value> {
    match value {
        Value::Lazy(reference) => resolve_reference(reference, collections, stats, waiting),
        Value::List(items) => items
            .iter()
            .map(|item| resolve_value(item, collections, stats, waiting))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Value::Map(entries) => {
            let mut resolved = std::collections::BTreeMap::new();
            for (name, item) in entries {
                resolved.insert(name.clone(), resolve_value(item, collections, stats, waiting)?);
            }
            Ok(Value::Map(resolved))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_reference(
    reference: &LazyReference,
    collections: &IndexMap<String, InventoryCollection>,
    stats: &mut ResolutionStats,
    waiting: &mut Vec<String>,
) -> Result<Value> {
    let target_collection = collections
        .get(&reference.collection)
        .ok_or_else(|| NimbusError::unknown_collection(reference.collection.clone()))?;

    let Some(target) = target_collection.lookup(&reference.key) else {
        stats.dangling += 1;
        return Ok(Value::Null);
    };

    match &reference.projection {
        None => {
            stats.links += 1;
            Ok(Value::Link(reference.target()))
        }
        Some(attribute) => match target.attribute(attribute) {
            Some(projected) if projected.has_unresolved() => {
                waiting.push(reference.collection.clone());
                Ok(Value::Lazy(reference.clone()))
            }
            Some(projected) => {
                stats.projections += 1;
                Ok(projected.clone())
            }
            None => {
                stats.projections += 1;
                Ok(Value::Null)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionSpec;
    use nimbus_core::types::{Attributes, StoredRecord};

    fn key(id: &str) -> InventoryKey {
        InventoryKey::new(id).unwrap()
    }

    fn collections(specs: Vec<CollectionSpec>) -> IndexMap<String, InventoryCollection> {
        specs
            .into_iter()
            .map(|s| (s.name.clone(), InventoryCollection::new(s)))
            .collect()
    }

    #[test]
    fn test_lazy_before_target_resolves_to_link() {
        let mut graph = collections(vec![
            CollectionSpec::complete("cloud_tenants"),
            CollectionSpec::complete("vms"),
        ]);
        let lazy = graph["cloud_tenants"].lazy_find("t1").unwrap();
        graph["vms"].find_or_build("s1").unwrap().set("cloud_tenant", lazy);
        graph["cloud_tenants"].find_or_build("t1").unwrap().set("name", "alpha");

        let stats = resolve(&mut graph).unwrap();
        let link = graph["vms"].find(&key("s1")).unwrap().get("cloud_tenant").unwrap();
        assert_eq!(link.as_link().unwrap().key, key("t1"));
        assert_eq!(stats.links, 1);
    }

    #[test]
    fn test_missing_target_resolves_to_null() {
        let mut graph = collections(vec![
            CollectionSpec::complete("flavors"),
            CollectionSpec::complete("vms"),
        ]);
        let lazy = graph["flavors"].lazy_find("missing").unwrap();
        graph["vms"].find_or_build("s1").unwrap().set("flavor", lazy);

        let stats = resolve(&mut graph).unwrap();
        assert!(graph["vms"].find(&key("s1")).unwrap().get("flavor").unwrap().is_null());
        assert_eq!(stats.dangling, 1);
    }

    #[test]
    fn test_projection_chain_resolves_in_passes() {
        let mut graph = collections(vec![
            CollectionSpec::complete("miq_templates"),
            CollectionSpec::complete("hardwares"),
            CollectionSpec::complete("vms"),
        ]);
        // vm hardware projects guest_os from the template hardware, which in
        // turn projects it from the template itself
        let from_template = graph["miq_templates"].lazy_find("img1").unwrap().project("os");
        graph["hardwares"].find_or_build("img1").unwrap().set("guest_os", from_template);
        let from_hardware = graph["hardwares"].lazy_find("img1").unwrap().project("guest_os");
        graph["hardwares"].find_or_build("s1").unwrap().set("guest_os", from_hardware);
        graph["miq_templates"].find_or_build("img1").unwrap().set("os", "linux");

        let stats = resolve(&mut graph).unwrap();
        let guest_os = graph["hardwares"].find(&key("s1")).unwrap().get("guest_os").unwrap();
        assert_eq!(guest_os, &Value::from("linux"));
        assert_eq!(stats.projections, 2);
        assert!(stats.passes >= 2);
    }

    #[test]
    fn test_projection_of_absent_attribute_is_null() {
        let mut graph = collections(vec![CollectionSpec::complete("vms")]);
        graph["vms"].find_or_build("s2").unwrap();
        let lazy = graph["vms"].lazy_find("s2").unwrap().project("name");
        graph["vms"].find_or_build("s1").unwrap().set("parent_name", lazy);

        resolve(&mut graph).unwrap();
        assert!(graph["vms"].find(&key("s1")).unwrap().get("parent_name").unwrap().is_null());
    }

    #[test]
    fn test_cycle_is_deadlock() {
        let mut graph = collections(vec![
            CollectionSpec::complete("hardwares"),
            CollectionSpec::complete("vms"),
        ]);
        let a = graph["hardwares"].lazy_find("h1").unwrap().project("x");
        let b = graph["vms"].lazy_find("s1").unwrap().project("y");
        graph["vms"].find_or_build("s1").unwrap().set("y", a);
        graph["hardwares"].find_or_build("h1").unwrap().set("x", b);

        let err = resolve(&mut graph).unwrap_err();
        match err {
            NimbusError::ResolutionDeadlock { collections } => {
                assert_eq!(collections, vec!["hardwares".to_string(), "vms".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_lists_and_cache_targets() {
        let mut graph = collections(vec![
            CollectionSpec::complete("cloud_tenants").cached(),
            CollectionSpec::complete("flavors"),
        ]);
        graph["cloud_tenants"].load_cache(vec![StoredRecord::new(key("t9"), Attributes::new())]);
        let tenants = vec![
            graph["cloud_tenants"].lazy_find("t9").unwrap(),
            graph["cloud_tenants"].lazy_find("gone").unwrap(),
        ];
        graph["flavors"].find_or_build("f1").unwrap().set("cloud_tenants", tenants);

        resolve(&mut graph).unwrap();
        let list = graph["flavors"].find(&key("f1")).unwrap().get("cloud_tenants").unwrap();
        let items = list.as_list().unwrap();
        assert_eq!(items[0].as_link().unwrap().key, key("t9"));
        assert!(items[1].is_null());
    }

    #[test]
    fn test_unknown_target_collection_is_configuration_error() {
        let mut graph = collections(vec![CollectionSpec::complete("vms")]);
        let lazy = LazyReference::new("nope", key("x"));
        graph["vms"].find_or_build("s1").unwrap().set("other", lazy);
        assert!(resolve(&mut graph).unwrap_err().is_configuration());
    }
}
