//! Static declaration of the collections a manager type refreshes.

use crate::collection::{CollectionScope, CollectionSpec, Strategy};
use nimbus_core::error::{NimbusError, Result};
use nimbus_core::types::ManagerScope;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The exact collection set of one manager type, in dependency order.
///
/// A collection may only depend on collections declared before it. Upserts
/// are written in declaration order and deletes in reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerDefinition {
    pub name: String,
    pub collections: Vec<CollectionSpec>,
}

impl ManagerDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Vec::new(),
        }
    }

    /// Append a collection declaration
    pub fn collection(mut self, spec: CollectionSpec) -> Self {
        self.collections.push(spec);
        self
    }

    /// Declaration for a collection by name
    pub fn spec(&self, name: &str) -> Option<&CollectionSpec> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// Single-target variant of this definition: every collection is targeted,
    /// so nothing outside the target is ever deleted.
    pub fn targeted(&self) -> Self {
        let collections = self
            .collections
            .iter()
            .cloned()
            .map(|mut spec| {
                spec.strategy = Strategy::Targeted;
                spec
            })
            .collect();
        Self {
            name: format!("{}_targeted", self.name),
            collections,
        }
    }

    /// Check the declaration against the scope it will run under
    pub fn validate(&self, scope: &ManagerScope) -> Result<()> {
        let mut declared: HashSet<&str> = HashSet::new();

        for spec in &self.collections {
            if spec.name.trim().is_empty() {
                return Err(NimbusError::config(format!(
                    "manager '{}' declares a collection with a blank name",
                    self.name
                )));
            }

            for dependency in &spec.depends_on {
                if declared.contains(dependency.as_str()) {
                    continue;
                }
                if self.spec(dependency).is_some() {
                    return Err(NimbusError::config(format!(
                        "collection '{}' depends on '{}', which is declared after it",
                        spec.name, dependency
                    )));
                }
                return Err(NimbusError::unknown_collection(format!(
                    "{} (dependency of '{}')",
                    dependency, spec.name
                )));
            }

            if !declared.insert(spec.name.as_str()) {
                return Err(NimbusError::config(format!(
                    "manager '{}' declares collection '{}' twice",
                    self.name, spec.name
                )));
            }

            if spec.scope == CollectionScope::ParentManager && scope.parent_id.is_none() {
                return Err(NimbusError::config(format!(
                    "collection '{}' is parent-scoped but manager '{}' has no parent",
                    spec.name, scope.manager_id
                )));
            }

            if spec.manager_ref.iter().any(|r| r.trim().is_empty()) {
                return Err(NimbusError::config(format!(
                    "collection '{}' has a blank manager_ref attribute",
                    spec.name
                )));
            }
        }

        Ok(())
    }
}
