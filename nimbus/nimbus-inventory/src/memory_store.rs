//! In-memory target store for tests and dry runs
//!
//! Rows are held per (collection, manager scope) with upsert semantics keyed
//! by the identity key. Individual collections can be made to fail in order
//! to exercise partial commits.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use indexmap::IndexMap;
use nimbus_core::error::{NimbusError, Result};
use nimbus_core::plan::{CollectionBatch, Operation};
use nimbus_core::traits::TargetStore;
use nimbus_core::types::{Attributes, InventoryKey, ManagerScope, StoredRecord};
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::{debug, info};

type TableKey = (String, ManagerScope);

/// In-memory target store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: DashMap<TableKey, IndexMap<InventoryKey, StoredRecord>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        info!("Creating in-memory target store");
        Self::default()
    }

    /// Make every read and write of `collection` fail until healed
    pub fn fail_collection(&self, collection: &str) {
        self.failing.lock().insert(collection.to_string());
    }

    /// Stop failing `collection`
    pub fn heal(&self, collection: &str) {
        self.failing.lock().remove(collection);
    }

    /// Insert or replace rows directly, bypassing batches
    pub fn seed(&self, collection: &str, scope: &ManagerScope, records: Vec<StoredRecord>) {
        let mut table = self
            .tables
            .entry((collection.to_string(), scope.clone()))
            .or_default();
        for record in records {
            table.insert(record.key.clone(), record);
        }
    }

    /// Current rows of a collection, in insertion order
    pub fn records(&self, collection: &str, scope: &ManagerScope) -> Vec<StoredRecord> {
        self.tables
            .get(&(collection.to_string(), scope.clone()))
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// A single row
    pub fn get(&self, collection: &str, scope: &ManagerScope, key: &InventoryKey) -> Option<StoredRecord> {
        self.tables
            .get(&(collection.to_string(), scope.clone()))
            .and_then(|table| table.get(key).cloned())
    }

    pub fn len(&self, collection: &str, scope: &ManagerScope) -> usize {
        self.tables
            .get(&(collection.to_string(), scope.clone()))
            .map(|table| table.len())
            .unwrap_or(0)
    }

    fn check_available(&self, collection: &str) -> Result<()> {
        if self.failing.lock().contains(collection) {
            return Err(NimbusError::store(collection, "collection unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetStore for MemoryStore {
    async fn current_membership(&self, collection: &str, scope: &ManagerScope) -> Result<Vec<StoredRecord>> {
        self.check_available(collection)?;
        Ok(self.records(collection, scope))
    }

    async fn apply_batch(&self, batch: &CollectionBatch) -> Result<usize> {
        self.check_available(&batch.collection)?;

        if let Some(write) = batch.writes.iter().find(|w| w.collection != batch.collection) {
            return Err(NimbusError::store(
                &batch.collection,
                format!("batch contains a write for {}", write.collection),
            ));
        }

        let mut table = self
            .tables
            .entry((batch.collection.clone(), batch.scope.clone()))
            .or_default();
        let now = Utc::now();

        for write in &batch.writes {
            match write.operation {
                Operation::Create | Operation::Update => match table.get_mut(&write.key) {
                    Some(existing) => {
                        merge(&mut existing.attributes, &write.attributes);
                        existing.updated_at = now;
                    }
                    None => {
                        let mut record = StoredRecord::new(write.key.clone(), write.attributes.clone());
                        record.created_at = now;
                        record.updated_at = now;
                        table.insert(write.key.clone(), record);
                    }
                },
                Operation::Delete => {
                    table.shift_remove(&write.key);
                }
            }
        }

        debug!(
            "Applied {} writes to {} ({})",
            batch.writes.len(),
            batch.collection,
            batch.scope
        );
        Ok(batch.writes.len())
    }
}

fn merge(target: &mut Attributes, changes: &Attributes) {
    for (name, value) in changes {
        target.insert(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::plan::{BatchPhase, PlannedWrite};
    use nimbus_core::types::Value;

    fn write(operation: Operation, id: &str, name: Option<&str>) -> PlannedWrite {
        let mut attributes = Attributes::new();
        if let Some(name) = name {
            attributes.insert("name".to_string(), Value::from(name));
        }
        PlannedWrite {
            collection: "cloud_tenants".to_string(),
            operation,
            key: InventoryKey::new(id).unwrap(),
            attributes,
        }
    }

    #[tokio::test]
    async fn test_create_is_upsert() {
        let store = MemoryStore::new();
        let scope = ManagerScope::new("ems-1");
        let mut batch = CollectionBatch::new("cloud_tenants", scope.clone(), BatchPhase::Upsert);
        batch.writes.push(write(Operation::Create, "t1", Some("alpha")));
        batch.writes.push(write(Operation::Create, "t1", Some("alpha2")));

        assert_eq!(store.apply_batch(&batch).await.unwrap(), 2);
        let rows = store.current_membership("cloud_tenants", &scope).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attributes["name"], Value::from("alpha2"));
    }

    #[tokio::test]
    async fn test_scopes_are_isolated() {
        let store = MemoryStore::new();
        let mut batch = CollectionBatch::new("cloud_tenants", ManagerScope::new("ems-1"), BatchPhase::Upsert);
        batch.writes.push(write(Operation::Create, "t1", Some("alpha")));
        store.apply_batch(&batch).await.unwrap();

        assert_eq!(store.len("cloud_tenants", &ManagerScope::new("ems-1")), 1);
        assert_eq!(store.len("cloud_tenants", &ManagerScope::new("ems-2")), 0);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        let store = MemoryStore::new();
        let scope = ManagerScope::new("ems-1");
        let mut batch = CollectionBatch::new("cloud_tenants", scope.clone(), BatchPhase::Delete);
        batch.writes.push(write(Operation::Delete, "t1", None));
        assert!(store.apply_batch(&batch).await.is_ok());
        assert_eq!(store.len("cloud_tenants", &scope), 0);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::new();
        let scope = ManagerScope::new("ems-1");
        store.fail_collection("cloud_tenants");
        let err = store.current_membership("cloud_tenants", &scope).await.unwrap_err();
        assert!(err.is_store());

        store.heal("cloud_tenants");
        assert!(store.current_membership("cloud_tenants", &scope).await.is_ok());
    }
}
