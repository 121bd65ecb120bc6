//! Write plan produced by diffing the inventory graph against the target store.

use crate::types::{Attributes, InventoryKey, ManagerScope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of write against the target store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// A single planned write.
///
/// `attributes` holds every attribute for a create, only the changed ones for
/// an update, and nothing for a delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedWrite {
    pub collection: String,
    pub operation: Operation,
    pub key: InventoryKey,
    #[serde(default)]
    pub attributes: Attributes,
}

/// Whether a batch carries creates/updates or deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Upsert,
    Delete,
}

/// All writes of one phase for one collection; the store applies it atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionBatch {
    pub collection: String,
    pub scope: ManagerScope,
    pub phase: BatchPhase,
    pub writes: Vec<PlannedWrite>,
}

impl CollectionBatch {
    pub fn new(collection: impl Into<String>, scope: ManagerScope, phase: BatchPhase) -> Self {
        Self {
            collection: collection.into(),
            scope,
            phase,
            writes: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }
}

/// Ordered write plan for one run.
///
/// Upsert batches follow the declared dependency order, delete batches come
/// afterwards in reverse dependency order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePlan {
    pub run_id: Uuid,
    pub scope: ManagerScope,
    pub created_at: DateTime<Utc>,
    pub batches: Vec<CollectionBatch>,
}

impl WritePlan {
    pub fn new(run_id: Uuid, scope: ManagerScope) -> Self {
        Self {
            run_id,
            scope,
            created_at: Utc::now(),
            batches: Vec::new(),
        }
    }

    /// Flattened, ordered list of writes
    pub fn operations(&self) -> impl Iterator<Item = &PlannedWrite> {
        self.batches.iter().flat_map(|b| b.writes.iter())
    }

    /// Number of writes of the given kind
    pub fn count(&self, operation: Operation) -> usize {
        self.operations().filter(|w| w.operation == operation).count()
    }

    pub fn creates(&self) -> usize {
        self.count(Operation::Create)
    }

    pub fn updates(&self) -> usize {
        self.count(Operation::Update)
    }

    pub fn deletes(&self) -> usize {
        self.count(Operation::Delete)
    }

    /// Writes targeting one collection, in plan order
    pub fn for_collection<'a>(&'a self, collection: &'a str) -> impl Iterator<Item = &'a PlannedWrite> + 'a {
        self.operations().filter(move |w| w.collection == collection)
    }

    /// Find the planned write for a collection and key
    pub fn find(&self, collection: &str, key: &InventoryKey) -> Option<&PlannedWrite> {
        self.operations()
            .find(|w| w.collection == collection && &w.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(CollectionBatch::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn write(collection: &str, operation: Operation, key: &str) -> PlannedWrite {
        let mut attributes = Attributes::new();
        if operation != Operation::Delete {
            attributes.insert("name".to_string(), Value::from(key));
        }
        PlannedWrite {
            collection: collection.to_string(),
            operation,
            key: InventoryKey::new(key).unwrap(),
            attributes,
        }
    }

    #[test]
    fn test_plan_counts_and_lookup() {
        let scope = ManagerScope::new("ems-1");
        let mut plan = WritePlan::new(Uuid::new_v4(), scope.clone());
        assert!(plan.is_empty());

        let mut tenants = CollectionBatch::new("cloud_tenants", scope.clone(), BatchPhase::Upsert);
        tenants.writes.push(write("cloud_tenants", Operation::Create, "t1"));
        tenants.writes.push(write("cloud_tenants", Operation::Update, "t2"));
        let mut deletes = CollectionBatch::new("cloud_tenants", scope, BatchPhase::Delete);
        deletes.writes.push(write("cloud_tenants", Operation::Delete, "t3"));
        plan.batches.push(tenants);
        plan.batches.push(deletes);

        assert_eq!(plan.creates(), 1);
        assert_eq!(plan.updates(), 1);
        assert_eq!(plan.deletes(), 1);
        assert_eq!(plan.for_collection("cloud_tenants").count(), 3);
        assert_eq!(plan.for_collection("vms").count(), 0);

        let t3 = InventoryKey::new("t3").unwrap();
        assert_eq!(plan.find("cloud_tenants", &t3).unwrap().operation, Operation::Delete);
        assert!(!plan.is_empty());
    }

    #[test]
    fn test_operation_serializes_snake_case() {
        let json = serde_json::to_string(&Operation::Create).unwrap();
        assert_eq!(json, "\"create\"");
    }
}
