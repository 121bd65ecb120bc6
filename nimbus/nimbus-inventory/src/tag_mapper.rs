//! Maps provider labels to canonical tag entities.

use crate::collection::InventoryCollection;
use nimbus_core::config::TagMappingRule;
use nimbus_core::error::Result;
use nimbus_core::types::ObjectRef;
use std::collections::HashMap;
use tracing::trace;

/// Name of the collection holding tag entities
pub const TAGS_COLLECTION: &str = "tags";

type MemoKey = (String, String, String);

/// Label to tag mapper for one run.
///
/// The same `(resource_type, label, value)` triple always yields the same tag
/// references within a run.
#[derive(Debug, Clone, Default)]
pub struct TagMapper {
    rules: Vec<TagMappingRule>,
    memo: HashMap<MemoKey, Vec<ObjectRef>>,
    hits: usize,
}

impl TagMapper {
    pub fn new(mut rules: Vec<TagMappingRule>) -> Self {
        // Resource-specific rules are applied before the general ones
        rules.sort_by_key(|r| r.resource_type.is_none());
        Self {
            rules,
            memo: HashMap::new(),
            hits: 0,
        }
    }

    pub fn rules(&self) -> &[TagMappingRule] {
        &self.rules
    }

    /// Number of lookups answered from the memo
    pub fn memo_hits(&self) -> usize {
        self.hits
    }

    /// Map labels of one resource to tag references, building the tag objects
    /// in `tags` on first sight.
    pub fn map_labels(
        &mut self,
        tags: &mut InventoryCollection,
        resource_type: &str,
        labels: &[(String, String)],
    ) -> Result<Vec<ObjectRef>> {
        let mut refs: Vec<ObjectRef> = Vec::new();

        for (label, value) in labels {
            let memo_key = (resource_type.to_string(), label.clone(), value.clone());
            let mapped = match self.memo.get(&memo_key) {
                Some(cached) => {
                    self.hits += 1;
                    cached.clone()
                }
                None => {
                    let built = self.build_tags(tags, resource_type, label, value)?;
                    self.memo.insert(memo_key, built.clone());
                    built
                }
            };

            for tag in mapped {
                if !refs.contains(&tag) {
                    refs.push(tag);
                }
            }
        }

        Ok(refs)
    }

    fn build_tags(
        &self,
        tags: &mut InventoryCollection,
        resource_type: &str,
        label: &str,
        value: &str,
    ) -> Result<Vec<ObjectRef>> {
        if value.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut refs = Vec::new();
        for rule in self.rules.iter().filter(|r| matches(r, resource_type, label)) {
            let name = normalize(value);
            let tag_key = format!("/managed/{}/{}", rule.category, name);
            trace!("Mapping label {}={} on {} to {}", label, value, resource_type, tag_key);

            let tag = tags.find_or_build(tag_key.as_str())?;
            tag.set("category", rule.category.as_str())
                .set("name", name)
                .set("value", value);
            let tag_ref = tag.object_ref();
            if !refs.contains(&tag_ref) {
                refs.push(tag_ref);
            }
        }
        Ok(refs)
    }
}

fn matches(rule: &TagMappingRule, resource_type: &str, label: &str) -> bool {
    rule.label == label
        && rule
            .resource_type
            .as_deref()
            .is_none_or(|t| t == resource_type)
}

/// Lowercase, with every non-alphanumeric character replaced by `_`
pub fn normalize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                '_'
            }
        })
        .collect()
}
