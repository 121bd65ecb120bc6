//! Persister: owns the collections of one manager for one run and turns the
//! built graph into an ordered write plan against the target store.

use crate::collection::{CollectionScope, CollectionSpec, InventoryCollection, Strategy};
use crate::definition::ManagerDefinition;
use crate::object::InventoryObject;
use crate::resolver::{self, ResolutionStats};
use crate::tag_mapper::{TAGS_COLLECTION, TagMapper};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use nimbus_core::config::RefreshConfig;
use nimbus_core::error::{NimbusError, Result};
use nimbus_core::plan::{BatchPhase, CollectionBatch, Operation, PlannedWrite, WritePlan};
use nimbus_core::traits::TargetStore;
use nimbus_core::types::{
    Attributes, IntoKey, InventoryKey, LazyReference, ManagerScope, ObjectRef, StoredRecord, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// Commit Report
// ============================================================================

/// Overall outcome of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Some collections failed, the others committed
    Partial,
    /// Errors occurred and no collection committed
    Failed,
}

/// Why a collection did not commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionFailure {
    /// Reading the current membership failed
    Membership { message: String },
    /// Applying a batch failed
    Apply { phase: BatchPhase, message: String },
    /// A collection this one depends on failed
    Skipped { dependency: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionError {
    pub collection: String,
    pub failure: CollectionFailure,
}

impl fmt::Display for CollectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.failure {
            CollectionFailure::Membership { message } => {
                write!(f, "{}: membership read failed: {}", self.collection, message)
            }
            CollectionFailure::Apply { phase, message } => {
                write!(f, "{}: {:?} batch failed: {}", self.collection, phase, message)
            }
            CollectionFailure::Skipped { dependency } => {
                write!(f, "{}: skipped because {} failed", self.collection, dependency)
            }
        }
    }
}

/// One batch the store accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionResult {
    pub collection: String,
    pub phase: BatchPhase,
    pub writes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReport {
    pub run_id: Uuid,
    pub plan: WritePlan,
    pub resolution: ResolutionStats,
    pub applied: Vec<CollectionResult>,
    pub errors: Vec<CollectionError>,
    pub status: RunStatus,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    /// Total number of writes the store accepted
    pub fn writes_applied(&self) -> usize {
        self.applied.iter().map(|r| r.writes).sum()
    }

    /// Whether the named collection failed or was skipped
    pub fn failed(&self, collection: &str) -> bool {
        self.errors.iter().any(|e| e.collection == collection)
    }
}

// ============================================================================
// Persister
// ============================================================================

/// The collections of one manager for one run.
pub struct Persister {
    definition: ManagerDefinition,
    scope: ManagerScope,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    collections: IndexMap<String, InventoryCollection>,
    tag_mapper: TagMapper,
    /// Undo log of the record being parsed
    journal: Option<RecordJournal>,
    /// Collections whose preload failed; they are reported at commit
    preload_failures: Vec<CollectionError>,
}

/// State needed to drop everything one record built
#[derive(Debug, Default)]
struct RecordJournal {
    lengths: HashMap<String, usize>,
    previous: HashMap<(String, InventoryKey), Attributes>,
    tags: Option<(InventoryCollection, TagMapper)>,
}

impl RecordJournal {
    /// Keep the attributes an existing object had before the record touched it
    fn remember(&mut self, collection: &InventoryCollection, key: &InventoryKey) {
        let Some(object) = collection.find(key) else {
            return;
        };
        self.previous
            .entry((collection.name().to_string(), key.clone()))
            .or_insert_with(|| object.attributes().clone());
    }
}

impl Persister {
    /// Validate the definition and create empty collections.
    ///
    /// Configuration problems surface here, before any collector or store I/O.
    pub fn new(definition: &ManagerDefinition, scope: ManagerScope, config: &RefreshConfig) -> Result<Self> {
        definition.validate(&scope)?;

        let collections = definition
            .collections
            .iter()
            .map(|spec| {
                let mut spec = spec.clone();
                spec.cache = spec.read_only || config.inventory.cache_enabled(&spec.name, spec.cache);
                (spec.name.clone(), InventoryCollection::new(spec))
            })
            .collect();

        let run_id = Uuid::new_v4();
        debug!(
            "Created persister for {} (scope {}, run {})",
            definition.name, scope, run_id
        );

        Ok(Self {
            definition: definition.clone(),
            scope,
            run_id,
            started_at: Utc::now(),
            collections,
            tag_mapper: TagMapper::new(config.tags.mappings.clone()),
            journal: None,
            preload_failures: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &ManagerDefinition {
        &self.definition
    }

    pub fn scope(&self) -> &ManagerScope {
        &self.scope
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn tag_mapper(&self) -> &TagMapper {
        &self.tag_mapper
    }

    /// Collection by name; unknown names are a configuration error
    pub fn collection(&self, name: &str) -> Result<&InventoryCollection> {
        self.collections
            .get(name)
            .ok_or_else(|| NimbusError::unknown_collection(name))
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut InventoryCollection> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| NimbusError::unknown_collection(name))
    }

    /// Collections in declared order
    pub fn collections(&self) -> impl Iterator<Item = &InventoryCollection> {
        self.collections.values()
    }

    pub fn find_or_build(&mut self, collection: &str, key: impl IntoKey) -> Result<&mut InventoryObject> {
        let target = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| NimbusError::unknown_collection(collection))?;
        let key = key.into_key().map_err(|e| e.in_collection(collection))?;
        if let Some(journal) = self.journal.as_mut() {
            journal.remember(target, &key);
        }
        target.find_or_build(key)
    }

    pub fn find_or_build_by(
        &mut self,
        collection: &str,
        attributes: &[(&str, Value)],
    ) -> Result<&mut InventoryObject> {
        let target = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| NimbusError::unknown_collection(collection))?;
        if let Some(journal) = self.journal.as_mut() {
            let key = target.key_for(attributes)?;
            journal.remember(target, &key);
        }
        target.find_or_build_by(attributes)
    }

    // ========================================================================
    // Record Journal
    // ========================================================================

    /// Start recording what the next record builds
    pub fn begin_record(&mut self) {
        let lengths = self
            .collections
            .iter()
            .map(|(name, collection)| (name.clone(), collection.len()))
            .collect();
        self.journal = Some(RecordJournal {
            lengths,
            ..RecordJournal::default()
        });
    }

    /// Keep everything the current record built
    pub fn finish_record(&mut self) {
        self.journal = None;
    }

    /// Drop every object the current record built and restore the attributes
    /// of the objects it changed
    pub fn rollback_record(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };

        for (name, collection) in self.collections.iter_mut() {
            if let Some(len) = journal.lengths.get(name) {
                collection.truncate(*len);
            }
        }
        for ((name, key), attributes) in journal.previous {
            if let Some(object) = self.collections.get_mut(&name).and_then(|c| c.find_mut(&key)) {
                *object.attributes_mut() = attributes;
            }
        }
        if let Some((tags, tag_mapper)) = journal.tags {
            self.collections.insert(TAGS_COLLECTION.to_string(), tags);
            self.tag_mapper = tag_mapper;
        }
    }

    pub fn lazy_find(&self, collection: &str, key: impl IntoKey) -> Result<LazyReference> {
        self.collection(collection)?.lazy_find(key)
    }

    pub fn lazy_find_by(&self, collection: &str, attributes: &[(&str, Value)]) -> Result<LazyReference> {
        self.collection(collection)?.lazy_find_by(attributes)
    }

    /// Manager scope a collection's rows live under
    pub fn scope_for(&self, spec: &CollectionSpec) -> Result<ManagerScope> {
        match spec.scope {
            CollectionScope::Manager => Ok(self.scope.clone()),
            CollectionScope::ParentManager => self.scope.parent().ok_or_else(|| {
                NimbusError::config(format!(
                    "collection '{}' is parent-scoped but {} has no parent",
                    spec.name, self.scope
                ))
            }),
        }
    }

    /// Load the current store rows of every cache-mode collection.
    ///
    /// A shared read-only collection that cannot be read fails the run. Any
    /// other collection that cannot be read is marked failed and reported by
    /// `commit`, together with its dependents.
    pub async fn preload(&mut self, store: &dyn TargetStore) -> Result<()> {
        let names: Vec<String> = self
            .collections
            .values()
            .filter(|c| c.cache_mode())
            .map(|c| c.name().to_string())
            .collect();

        for name in names {
            let collection = self.collection(&name)?;
            let read_only = collection.is_read_only();
            let scope = self.scope_for(collection.spec())?;
            match store.current_membership(&name, &scope).await {
                Ok(rows) => {
                    debug!("Preloaded {} rows into {} ({})", rows.len(), name, scope);
                    self.collection_mut(&name)?.load_cache(rows);
                }
                Err(e) if read_only => return Err(e),
                Err(e) => {
                    warn!("Failed to preload {}: {}", name, e);
                    self.preload_failures.push(CollectionError {
                        collection: name,
                        failure: CollectionFailure::Membership { message: e.to_string() },
                    });
                }
            }
        }
        Ok(())
    }

    /// Collections whose preload failed
    pub fn preload_failures(&self) -> &[CollectionError] {
        &self.preload_failures
    }

    /// Map labels of one resource to tag references in the `tags` collection
    pub fn map_labels(&mut self, resource_type: &str, labels: &[(String, String)]) -> Result<Vec<ObjectRef>> {
        let tags = self
            .collections
            .get_mut(TAGS_COLLECTION)
            .ok_or_else(|| NimbusError::unknown_collection(TAGS_COLLECTION))?;
        if let Some(journal) = self.journal.as_mut() {
            if journal.tags.is_none() && !labels.is_empty() {
                journal.tags = Some((tags.clone(), self.tag_mapper.clone()));
            }
        }
        self.tag_mapper.map_labels(tags, resource_type, labels)
    }

    /// Replace every lazy reference in the graph
    pub fn resolve(&mut self) -> Result<ResolutionStats> {
        resolver::resolve(&mut self.collections)
    }

    /// Diff the built graph against store memberships.
    ///
    /// Collections without a membership entry are left out of the plan.
    pub fn plan(&self, memberships: &HashMap<String, Vec<StoredRecord>>) -> WritePlan {
        let mut plan = WritePlan::new(self.run_id, self.scope.clone());
        let mut deletes = Vec::new();

        for collection in self.collections.values() {
            if collection.is_read_only() {
                continue;
            }
            let Some(stored) = memberships.get(collection.name()) else {
                continue;
            };
            // scope_for only fails for definitions rejected in `new`
            let scope = self.scope_for(collection.spec()).unwrap_or_else(|_| self.scope.clone());

            let upserts = self.diff_upserts(collection, stored, &scope);
            if !upserts.is_empty() {
                plan.batches.push(upserts);
            }

            if collection.strategy() == Strategy::Complete {
                let batch = self.diff_deletes(collection, stored, &scope);
                if !batch.is_empty() {
                    deletes.push(batch);
                }
            }
        }

        plan.batches.extend(deletes.into_iter().rev());
        plan
    }

    fn diff_upserts(
        &self,
        collection: &InventoryCollection,
        stored: &[StoredRecord],
        scope: &ManagerScope,
    ) -> CollectionBatch {
        let index: HashMap<&InventoryKey, &StoredRecord> = stored.iter().map(|r| (&r.key, r)).collect();
        let mut batch = CollectionBatch::new(collection.name(), scope.clone(), BatchPhase::Upsert);

        for object in collection.all_built() {
            match index.get(object.key()) {
                None => batch.writes.push(PlannedWrite {
                    collection: collection.name().to_string(),
                    operation: Operation::Create,
                    key: object.key().clone(),
                    attributes: object.attributes().clone(),
                }),
                Some(record) => {
                    let changed = changed_attributes(object.attributes(), &record.attributes);
                    if !changed.is_empty() {
                        batch.writes.push(PlannedWrite {
                            collection: collection.name().to_string(),
                            operation: Operation::Update,
                            key: object.key().clone(),
                            attributes: changed,
                        });
                    }
                }
            }
        }
        batch
    }

    fn diff_deletes(
        &self,
        collection: &InventoryCollection,
        stored: &[StoredRecord],
        scope: &ManagerScope,
    ) -> CollectionBatch {
        let mut batch = CollectionBatch::new(collection.name(), scope.clone(), BatchPhase::Delete);

        for record in stored {
            if collection.find(&record.key).is_some() {
                continue;
            }
            // Rows created by a concurrent run after this one started are not ours to drop
            if record.created_at > self.started_at {
                debug!(
                    "Keeping {}:{} created after run start",
                    collection.name(),
                    record.key
                );
                continue;
            }
            batch.writes.push(PlannedWrite {
                collection: collection.name().to_string(),
                operation: Operation::Delete,
                key: record.key.clone(),
                attributes: Attributes::new(),
            });
        }
        batch
    }

    /// Resolve references, diff against the store and apply the plan.
    ///
    /// Each collection batch commits or fails on its own. A failed collection
    /// takes its dependents with it; independent collections still commit.
    #[instrument(skip(self, store), fields(manager = %self.definition.name, run_id = %self.run_id))]
    pub async fn commit(&mut self, store: &dyn TargetStore) -> Result<CommitReport> {
        let resolution = self.resolve()?;

        let mut failed: HashSet<String> = self
            .preload_failures
            .iter()
            .map(|e| e.collection.clone())
            .collect();
        let mut errors = self.preload_failures.clone();
        let mut memberships = HashMap::new();

        for collection in self.collections.values().filter(|c| !c.is_read_only()) {
            let name = collection.name().to_string();
            if failed.contains(&name) {
                continue;
            }
            if let Some(error) = skipped_by_dependency(collection.spec(), &failed) {
                failed.insert(name);
                errors.push(error);
                continue;
            }

            let scope = self.scope_for(collection.spec())?;
            match store.current_membership(&name, &scope).await {
                Ok(rows) => {
                    memberships.insert(name, rows);
                }
                Err(e) => {
                    warn!("Failed to read membership of {}: {}", name, e);
                    errors.push(CollectionError {
                        collection: name.clone(),
                        failure: CollectionFailure::Membership { message: e.to_string() },
                    });
                    failed.insert(name);
                }
            }
        }

        let plan = self.plan(&memberships);
        let mut applied = Vec::new();

        for batch in &plan.batches {
            if failed.contains(&batch.collection) {
                continue;
            }
            let spec = self.collection(&batch.collection)?.spec();
            if let Some(error) = skipped_by_dependency(spec, &failed) {
                failed.insert(batch.collection.clone());
                errors.push(error);
                continue;
            }

            match store.apply_batch(batch).await {
                Ok(writes) => {
                    debug!("Applied {:?} batch of {} writes to {}", batch.phase, writes, batch.collection);
                    applied.push(CollectionResult {
                        collection: batch.collection.clone(),
                        phase: batch.phase,
                        writes,
                    });
                }
                Err(e) => {
                    warn!("Failed to apply {:?} batch to {}: {}", batch.phase, batch.collection, e);
                    errors.push(CollectionError {
                        collection: batch.collection.clone(),
                        failure: CollectionFailure::Apply {
                            phase: batch.phase,
                            message: e.to_string(),
                        },
                    });
                    failed.insert(batch.collection.clone());
                }
            }
        }

        let status = if errors.is_empty() {
            RunStatus::Success
        } else if applied.is_empty() {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };

        info!(
            "Committed {} ({}): {} creates, {} updates, {} deletes, {} failed collections, status {:?}",
            self.definition.name,
            self.scope,
            plan.creates(),
            plan.updates(),
            plan.deletes(),
            failed.len(),
            status
        );

        Ok(CommitReport {
            run_id: self.run_id,
            plan,
            resolution,
            applied,
            errors,
            status,
        })
    }
}

/// Attributes whose assigned value differs from the stored one.
///
/// A null assignment for an attribute the store does not hold is unchanged.
fn changed_attributes(assigned: &Attributes, stored: &Attributes) -> Attributes {
    assigned
        .iter()
        .filter(|(name, value)| match stored.get(*name) {
            Some(current) => current != *value,
            None => !value.is_null(),
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn skipped_by_dependency(spec: &CollectionSpec, failed: &HashSet<String>) -> Option<CollectionError> {
    spec.depends_on
        .iter()
        .find(|d| failed.contains(*d))
        .map(|dependency| CollectionError {
            collection: spec.name.clone(),
            failure: CollectionFailure::Skipped {
                dependency: dependency.clone(),
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key(id: &str) -> InventoryKey {
        InventoryKey::new(id).unwrap()
    }

    fn stored(id: &str, attrs: &[(&str, Value)]) -> StoredRecord {
        let attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let mut record = StoredRecord::new(key(id), attributes);
        record.created_at = Utc::now() - Duration::hours(1);
        record
    }

    fn definition() -> ManagerDefinition {
        ManagerDefinition::new("cloud")
            .collection(CollectionSpec::complete("cloud_tenants"))
            .collection(CollectionSpec::targeted("flavors"))
            .collection(CollectionSpec::complete("vms").depends_on(["cloud_tenants"]))
    }

    fn persister() -> Persister {
        Persister::new(&definition(), ManagerScope::new("ems-1"), &RefreshConfig::default()).unwrap()
    }

    #[test]
    fn test_unknown_collection_is_configuration_error() {
        let mut persister = persister();
        assert!(persister.collection("networks").unwrap_err().is_configuration());
        assert!(persister.find_or_build("networks", "n1").unwrap_err().is_configuration());
    }

    #[test]
    fn test_invalid_definition_fails_construction() {
        let def = ManagerDefinition::new("bad").collection(CollectionSpec::complete("vms").depends_on(["hosts"]));
        let result = Persister::new(&def, ManagerScope::new("ems-1"), &RefreshConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_config_enables_cache() {
        let mut config = RefreshConfig::default();
        config.inventory.cache_all = true;
        let persister = Persister::new(&definition(), ManagerScope::new("ems-1"), &config).unwrap();
        assert!(persister.collections().all(|c| c.cache_mode()));
    }

    #[test]
    fn test_plan_create_update_delete() {
        let mut persister = persister();
        persister.find_or_build("cloud_tenants", "t1").unwrap().set("name", "alpha2");
        persister.find_or_build("cloud_tenants", "t2").unwrap().set("name", "beta");

        let mut memberships = HashMap::new();
        memberships.insert(
            "cloud_tenants".to_string(),
            vec![
                stored("t1", &[("name", Value::from("alpha"))]),
                stored("t3", &[("name", Value::from("gamma"))]),
            ],
        );

        let plan = persister.plan(&memberships);
        assert_eq!(plan.creates(), 1);
        assert_eq!(plan.updates(), 1);
        assert_eq!(plan.deletes(), 1);

        let update = plan.find("cloud_tenants", &key("t1")).unwrap();
        assert_eq!(update.operation, Operation::Update);
        assert_eq!(update.attributes.len(), 1);
        assert_eq!(plan.find("cloud_tenants", &key("t3")).unwrap().operation, Operation::Delete);
    }

    #[test]
    fn test_targeted_collection_never_deletes() {
        let mut persister = persister();
        persister.find_or_build("flavors", "f1").unwrap().set("name", "m1.small");

        let mut memberships = HashMap::new();
        memberships.insert("flavors".to_string(), vec![stored("f1", &[]), stored("f2", &[])]);

        let plan = persister.plan(&memberships);
        assert_eq!(plan.deletes(), 0);
        assert_eq!(plan.updates(), 1);
    }

    #[test]
    fn test_null_assignment_for_absent_attribute_is_unchanged() {
        let mut persister = persister();
        persister
            .find_or_build("cloud_tenants", "t1")
            .unwrap()
            .set("name", "alpha")
            .set("description", Value::Null);

        let mut memberships = HashMap::new();
        memberships.insert(
            "cloud_tenants".to_string(),
            vec![stored("t1", &[("name", Value::from("alpha"))])],
        );
        assert!(persister.plan(&memberships).is_empty());
    }

    #[test]
    fn test_rows_created_after_start_are_kept() {
        let persister = persister();
        let mut fresh = StoredRecord::new(key("t9"), Attributes::new());
        fresh.created_at = persister.started_at() + Duration::seconds(5);

        let mut memberships = HashMap::new();
        memberships.insert("cloud_tenants".to_string(), vec![fresh, stored("t8", &[])]);

        let plan = persister.plan(&memberships);
        assert_eq!(plan.deletes(), 1);
        assert!(plan.find("cloud_tenants", &key("t9")).is_none());
    }

    #[test]
    fn test_delete_batches_in_reverse_order() {
        let persister = persister();
        let mut memberships = HashMap::new();
        memberships.insert("cloud_tenants".to_string(), vec![stored("t1", &[])]);
        memberships.insert("vms".to_string(), vec![stored("s1", &[])]);

        let plan = persister.plan(&memberships);
        let order: Vec<&str> = plan.batches.iter().map(|b| b.collection.as_str()).collect();
        assert_eq!(order, vec!["vms", "cloud_tenants"]);
    }

    #[test]
    fn test_map_labels_requires_tags_collection() {
        let mut persister = persister();
        let labels = vec![("env".to_string(), "prod".to_string())];
        assert!(persister.map_labels("VmTelefonica", &labels).unwrap_err().is_configuration());
    }

    #[test]
    fn test_skipped_by_dependency() {
        let spec = CollectionSpec::complete("vms").depends_on(["cloud_tenants"]);
        let failed: HashSet<String> = ["cloud_tenants".to_string()].into_iter().collect();
        let error = skipped_by_dependency(&spec, &failed).unwrap();
        assert_eq!(error.to_string(), "vms: skipped because cloud_tenants failed");
        assert!(skipped_by_dependency(&spec, &HashSet::new()).is_none());
    }
}
